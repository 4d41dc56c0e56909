#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use storefront_checkout::{
    build_router,
    config::AppConfig,
    errors::ServiceError,
    message_queue::InMemoryMessageQueue,
    providers::mercadopago::{PaymentGateway, PaymentRecord, PreferenceRequest, PreferenceResponse},
    store::InMemoryOrderStore,
    AppState,
};
use tower::ServiceExt;

/// Payment provider double: hands out numbered preferences and serves canned payments.
#[derive(Default)]
pub struct FakeGateway {
    preferences: Mutex<Vec<(PreferenceRequest, String)>>,
    payments: Mutex<HashMap<String, Result<PaymentRecord, ServiceError>>>,
    preference_error: Mutex<Option<ServiceError>>,
    pub payment_lookups: AtomicUsize,
}

impl FakeGateway {
    pub fn preference_calls(&self) -> Vec<(PreferenceRequest, String)> {
        self.preferences.lock().unwrap().clone()
    }

    pub fn fail_preferences_with(&self, err: ServiceError) {
        *self.preference_error.lock().unwrap() = Some(err);
    }

    pub fn set_payment(&self, id: &str, result: Result<PaymentRecord, ServiceError>) {
        self.payments.lock().unwrap().insert(id.to_string(), result);
    }

    pub fn lookups(&self) -> usize {
        self.payment_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_preference(
        &self,
        preference: &PreferenceRequest,
        idempotency_key: &str,
    ) -> Result<PreferenceResponse, ServiceError> {
        if let Some(err) = self.preference_error.lock().unwrap().clone() {
            return Err(err);
        }
        let mut calls = self.preferences.lock().unwrap();
        calls.push((preference.clone(), idempotency_key.to_string()));
        let id = format!("pref-{}", calls.len());
        Ok(PreferenceResponse {
            init_point: Some(format!("https://mp.example/checkout/{}", id)),
            sandbox_init_point: Some(format!("https://sandbox.mp.example/checkout/{}", id)),
            external_reference: Some(preference.external_reference.clone()),
            id: Some(id),
        })
    }

    async fn get_payment(&self, payment_id: &str) -> Result<PaymentRecord, ServiceError> {
        self.payment_lookups.fetch_add(1, Ordering::SeqCst);
        self.payments
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .unwrap_or_else(|| Err(ServiceError::upstream(Some(404), "payment not found")))
    }
}

/// Router wired to fakes, with handles to inspect them.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub store: InMemoryOrderStore,
    pub queue: Arc<InMemoryMessageQueue>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self::build(config, true)
    }

    pub fn without_credential() -> Self {
        Self::build(AppConfig::default(), false)
    }

    fn build(config: AppConfig, with_gateway: bool) -> Self {
        let gateway = Arc::new(FakeGateway::default());
        let store = InMemoryOrderStore::new();
        let queue = Arc::new(InMemoryMessageQueue::new());
        let state = AppState::new(
            Arc::new(config),
            with_gateway.then(|| gateway.clone() as Arc<dyn PaymentGateway>),
            Arc::new(store.clone()),
            queue.clone(),
        );
        Self {
            router: build_router(state.clone()),
            state,
            gateway,
            store,
            queue,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response {
        self.request(Method::POST, uri, Some(body), &[]).await
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn cart_body() -> Value {
    json!({
        "items": [
            { "product": { "_id": "p1", "name": "Camiseta", "price": 49.9, "category": "roupas" }, "quantity": 2 },
            { "product": { "_id": "p2", "name": "Caneca", "price": "25.50" } }
        ],
        "metadata": {
            "orderNumber": "ORDER-1001",
            "customerName": "Ana Souza",
            "customerEmail": "ana@example.com",
            "clerkUserId": "user_123",
            "shippingAddress": { "rua": "Rua das Flores", "numero": "10", "cidade": "Recife", "estado": "PE", "cep": "50000-000" }
        }
    })
}

pub fn approved_payment(id: &str, order_number: &str) -> PaymentRecord {
    serde_json::from_value(json!({
        "id": id,
        "status": "approved",
        "status_detail": "accredited",
        "external_reference": format!("{}-1700000000000-abcdefghi", order_number),
        "transaction_amount": 125.3,
        "currency_id": "BRL",
        "payment_method_id": "pix",
        "payment_type_id": "bank_transfer",
        "date_approved": "2024-05-01T12:00:00Z",
        "payer": { "email": "payer@example.com", "first_name": "Ana" },
        "metadata": {
            "order_number": order_number,
            "customer_name": "Ana Souza",
            "customer_email": "ana@example.com",
            "clerk_user_id": "user_123"
        }
    }))
    .unwrap()
}

pub fn payment_with_status(id: &str, status: &str) -> PaymentRecord {
    serde_json::from_value(json!({
        "id": id,
        "status": status,
        "transaction_amount": 10,
        "external_reference": "ORDER-9"
    }))
    .unwrap()
}

pub fn payment_notification(id: &str) -> Value {
    json!({ "type": "payment", "action": "payment.updated", "data": { "id": id } })
}
