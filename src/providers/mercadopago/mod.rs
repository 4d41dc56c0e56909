//! Mercado Pago integration: preference creation and payment lookup.

mod client;
mod types;

pub use client::{MercadoPagoClient, DEFAULT_API_BASE};
pub use types::*;

use async_trait::async_trait;

use crate::errors::ServiceError;

/// Remote payment provider seen by the checkout and webhook services.
///
/// Implementations classify provider failures into [`ServiceError::UpstreamAuthError`]
/// and [`ServiceError::UpstreamError`].
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Creates a checkout preference. `idempotency_key` lets the provider deduplicate
    /// retried creations.
    async fn create_preference(
        &self,
        preference: &PreferenceRequest,
        idempotency_key: &str,
    ) -> Result<PreferenceResponse, ServiceError>;

    /// Fetches the authoritative state of a payment.
    async fn get_payment(&self, payment_id: &str) -> Result<PaymentRecord, ServiceError>;
}
