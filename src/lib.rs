//! Storefront Checkout
//!
//! PIX checkout preferences and payment notifications for the storefront, backed by
//! Mercado Pago.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod errors;
pub mod handlers;
pub mod message_queue;
pub mod middleware_helpers;
pub mod models;
pub mod openapi;
pub mod providers;
pub mod services;
pub mod store;
pub mod tracing;

use axum::{
    http::HeaderValue,
    response::Json,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    message_queue::{InMemoryMessageQueue, MessageQueue},
    middleware_helpers::{idempotency_middleware, request_id_middleware, IdempotencyStore},
    providers::mercadopago::{MercadoPagoClient, PaymentGateway},
    services::{checkout::CheckoutService, payment_webhooks::PaymentWebhookService},
    store::{InMemoryOrderStore, OrderStore, SanityOrderStore, SanitySettings},
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub checkout: CheckoutService,
    pub webhooks: PaymentWebhookService,
    pub idempotency: IdempotencyStore,
}

impl AppState {
    /// Wires the services from already constructed collaborators.
    pub fn new(
        config: Arc<AppConfig>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        store: Arc<dyn OrderStore>,
        retry_queue: Arc<dyn MessageQueue>,
    ) -> Self {
        Self {
            checkout: CheckoutService::new(gateway.clone(), config.clone()),
            webhooks: PaymentWebhookService::new(gateway, store, retry_queue, config.clone()),
            idempotency: IdempotencyStore::new(),
            config,
        }
    }

    /// Builds the provider client, order store and retry queue described by `config`.
    pub fn from_config(config: AppConfig) -> Result<Self, ServiceError> {
        let config = Arc::new(config);

        let gateway: Option<Arc<dyn PaymentGateway>> = match config.mercadopago_access_token() {
            Some(token) => Some(Arc::new(MercadoPagoClient::new(
                token,
                config.mercadopago_api_base.clone(),
                config.provider_timeout(),
            )?)),
            None => None,
        };

        let store: Arc<dyn OrderStore> = if config.uses_sanity_store() {
            let project_id = config.sanity_project_id.as_deref().ok_or_else(|| {
                ServiceError::ConfigurationError("sanity project id is not configured".into())
            })?;
            let token = config.sanity_token.clone().ok_or_else(|| {
                ServiceError::ConfigurationError("sanity token is not configured".into())
            })?;
            let settings = SanitySettings {
                base_url: SanitySettings::project_url(project_id, &config.sanity_api_host),
                dataset: config.sanity_dataset.clone(),
                api_version: config.sanity_api_version.clone(),
                token,
                timeout: config.provider_timeout(),
            };
            Arc::new(SanityOrderStore::new(settings)?)
        } else {
            Arc::new(InMemoryOrderStore::new())
        };

        let retry_queue: Arc<dyn MessageQueue> = Arc::new(InMemoryMessageQueue::new());

        Ok(Self::new(config, gateway, store, retry_queue))
    }
}

/// CORS from `cors_allowed_origins`; permissive outside production when none are set.
pub fn cors_layer(config: &AppConfig) -> Result<CorsLayer, ServiceError> {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any))
    } else if !config.is_production() {
        Ok(CorsLayer::permissive())
    } else {
        Err(ServiceError::ConfigurationError(
            "missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS".into(),
        ))
    }
}

/// Every route of the service with its middleware stack.
pub fn build_router(state: AppState) -> Router {
    let checkout = Router::new()
        .route(
            "/checkout/pix",
            get(handlers::checkout::checkout_probe).post(handlers::checkout::create_pix_checkout),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.idempotency.clone(),
            idempotency_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::liveness_check))
        .route(
            "/webhooks/payment",
            get(handlers::payment_webhooks::webhook_probe)
                .post(handlers::payment_webhooks::payment_webhook),
        )
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(openapi::ApiDoc::openapi()) }),
        )
        .merge(checkout)
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(request_id_middleware))
        .with_state(state)
}
