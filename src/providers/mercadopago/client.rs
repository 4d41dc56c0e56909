use async_trait::async_trait;
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{PaymentGateway, PaymentRecord, PreferenceRequest, PreferenceResponse};
use crate::errors::ServiceError;

pub const DEFAULT_API_BASE: &str = "https://api.mercadopago.com";
const MAX_ERROR_BODY_CHARS: usize = 500;

/// reqwest-backed Mercado Pago client. Built once at startup and shared.
#[derive(Clone)]
pub struct MercadoPagoClient {
    http: reqwest::Client,
    api_base: Url,
    access_token: String,
}

impl std::fmt::Debug for MercadoPagoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MercadoPagoClient")
            .field("api_base", &self.api_base.as_str())
            .finish_non_exhaustive()
    }
}

impl MercadoPagoClient {
    pub fn new(
        access_token: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::ConfigurationError(format!("http client: {}", e)))?;
        let api_base = Url::parse(&api_base.into())
            .map_err(|e| ServiceError::ConfigurationError(format!("payment provider url: {}", e)))?;
        if api_base.cannot_be_a_base() {
            return Err(ServiceError::ConfigurationError(
                "payment provider url cannot carry a path".into(),
            ));
        }

        Ok(Self {
            http,
            api_base,
            access_token: access_token.into(),
        })
    }

    /// Appends `segments` to the API base. Each segment is percent-encoded on its own, so
    /// a `/` or `..` inside one never changes the resulting path.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ServiceError::upstream(Some(status.as_u16()), format!("invalid response body: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

/// Maps a non-success provider status to the service taxonomy.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> ServiceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            warn!(status = status.as_u16(), "payment provider rejected the access token");
            ServiceError::UpstreamAuthError
        }
        _ => {
            let snippet: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            ServiceError::upstream(
                Some(status.as_u16()),
                format!("status {}: {}", status.as_u16(), snippet),
            )
        }
    }
}

fn transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::upstream(None, "request to payment provider timed out")
    } else {
        ServiceError::upstream(err.status().map(|s| s.as_u16()), err.to_string())
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoClient {
    fn name(&self) -> &'static str {
        "mercadopago"
    }

    #[instrument(skip(self, preference), fields(external_reference = %preference.external_reference))]
    async fn create_preference(
        &self,
        preference: &PreferenceRequest,
        idempotency_key: &str,
    ) -> Result<PreferenceResponse, ServiceError> {
        debug!(items = preference.items.len(), "creating checkout preference");
        let response = self
            .http
            .post(self.url(&["checkout", "preferences"]))
            .bearer_auth(&self.access_token)
            .header("X-Idempotency-Key", idempotency_key)
            .json(preference)
            .send()
            .await
            .map_err(transport_error)?;

        Self::decode(response).await
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, payment_id: &str) -> Result<PaymentRecord, ServiceError> {
        let response = self
            .http
            .get(self.url(&["v1", "payments", payment_id]))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(transport_error)?;

        Self::decode(response).await
    }
}
