use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every checkout and webhook endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutErrorResponse {
    pub success: bool,
    /// Short, user-facing description of what went wrong
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Only present outside production
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<Value>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Payment ID missing")]
    PaymentIdMissing,

    #[error("Malformed notification: {0}")]
    MalformedNotification(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Payment provider rejected the credential")]
    UpstreamAuthError,

    #[error("Payment provider error: {message}")]
    UpstreamError {
        status: Option<u16>,
        message: String,
        retryable: bool,
    },

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ServiceError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        let retryable = status.map_or(true, |s| s >= 500 || s == 429);
        Self::UpstreamError {
            status,
            message: message.into(),
            retryable,
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::PaymentIdMissing | Self::MalformedNotification(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidSignature | Self::UpstreamAuthError => StatusCode::UNAUTHORIZED,
            Self::ConfigurationError(_)
            | Self::UpstreamError { .. }
            | Self::PersistenceError(_)
            | Self::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller can safely retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::UpstreamError { retryable, .. } => *retryable,
            Self::PersistenceError(_) => true,
            _ => false,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Operator-side failures return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::ConfigurationError(_) => "Payment configuration not found".to_string(),
            Self::UpstreamAuthError => "Authentication error".to_string(),
            Self::UpstreamError { .. } | Self::Serialization(_) => {
                "Internal server error".to_string()
            }
            Self::PersistenceError(_) => "Order could not be recorded".to_string(),
            _ => self.to_string(),
        }
    }

    fn public_details(&self) -> Option<String> {
        match self {
            Self::InvalidInput(msg) if msg.starts_with("invalid price") => {
                Some("price must be a number greater than zero".to_string())
            }
            Self::InvalidInput(msg) if msg.starts_with("invalid quantity") => {
                Some("quantity must be a whole number of at least 1".to_string())
            }
            Self::InvalidInput(msg) if msg == "empty cart" => {
                Some("the item list is empty or missing".to_string())
            }
            Self::InvalidInput(msg) if msg == "incomplete customer data" => {
                Some("customer e-mail or name was not provided".to_string())
            }
            Self::ConfigurationError(_) => {
                Some("the payment provider credential is not configured on the server".to_string())
            }
            Self::UpstreamAuthError => {
                Some("the payment provider credential is invalid or expired".to_string())
            }
            Self::UpstreamError { retryable: true, .. } => {
                Some("the payment provider is temporarily unavailable".to_string())
            }
            _ => None,
        }
    }

    fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::InvalidInput(msg) if msg == "empty cart" => {
                Some("Add products to the cart before checking out")
            }
            Self::InvalidInput(msg) if msg.starts_with("incomplete") || msg.contains("email") => {
                Some("Make sure you are signed in with a complete profile")
            }
            Self::InvalidInput(_) => Some("Remove the affected product from the cart and try again"),
            Self::ConfigurationError(_) => Some("Check the server environment variables"),
            Self::UpstreamAuthError => Some("Check the payment provider credentials"),
            Self::UpstreamError { .. } => Some("Try again in a few moments"),
            _ => None,
        }
    }

    /// Builds the error body. `diagnostics` adds the raw internal message and must be
    /// off in production.
    pub fn to_error_response(&self, diagnostics: bool) -> CheckoutErrorResponse {
        let debug_info = diagnostics.then(|| {
            let mut info = serde_json::json!({
                "error_type": self.kind(),
                "message": self.to_string(),
            });
            if let Self::UpstreamError { status: Some(status), .. } = self {
                info["upstream_status"] = Value::from(*status);
            }
            info
        });

        CheckoutErrorResponse {
            success: false,
            error: self.response_message(),
            details: self.public_details(),
            suggestion: self.suggestion().map(str::to_string),
            request_id: current_request_id(),
            debug_info,
        }
    }

    /// Like [`IntoResponse`] but with diagnostic details toggled explicitly.
    pub fn into_response_with(self, diagnostics: bool) -> Response {
        let status = self.status_code();
        (status, Json(self.to_error_response(diagnostics))).into_response()
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::PaymentIdMissing => "payment_id_missing",
            Self::MalformedNotification(_) => "malformed_notification",
            Self::InvalidSignature => "invalid_signature",
            Self::ConfigurationError(_) => "configuration_error",
            Self::UpstreamAuthError => "upstream_auth_error",
            Self::UpstreamError { .. } => "upstream_error",
            Self::PersistenceError(_) => "persistence_error",
            Self::Serialization(_) => "serialization_error",
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Serialization(err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        self.into_response_with(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::invalid_input("empty cart").into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: CheckoutErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(!payload.success);
        assert_eq!(payload.error, "empty cart");
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert!(payload.suggestion.is_some());
    }

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::invalid_input("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::PaymentIdMissing.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::UpstreamAuthError.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::upstream(Some(503), "down").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::ConfigurationError("missing token".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::PersistenceError("write failed".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn operator_errors_hide_internal_details() {
        let err = ServiceError::ConfigurationError("APP__MERCADOPAGO_ACCESS_TOKEN unset".into());
        let body = err.to_error_response(false);
        assert_eq!(body.error, "Payment configuration not found");
        assert!(body.debug_info.is_none());
        assert!(!serde_json::to_string(&body).unwrap().contains("ACCESS_TOKEN"));

        let err = ServiceError::upstream(Some(500), "upstream body: {\"cause\":\"boom\"}");
        let body = err.to_error_response(false);
        assert_eq!(body.error, "Internal server error");
        assert!(!serde_json::to_string(&body).unwrap().contains("boom"));
    }

    #[test]
    fn diagnostics_expose_internal_message() {
        let err = ServiceError::upstream(Some(502), "bad gateway from provider");
        let body = err.to_error_response(true);
        let info = body.debug_info.expect("debug info in diagnostic mode");
        assert_eq!(info["error_type"], "upstream_error");
        assert_eq!(info["upstream_status"], 502);
        assert!(info["message"].as_str().unwrap().contains("bad gateway"));
    }

    #[test]
    fn retryability() {
        assert!(ServiceError::upstream(None, "timeout").is_retryable());
        assert!(ServiceError::upstream(Some(503), "unavailable").is_retryable());
        assert!(!ServiceError::upstream(Some(400), "bad request").is_retryable());
        assert!(ServiceError::PersistenceError("x".into()).is_retryable());
        assert!(!ServiceError::invalid_input("x").is_retryable());
    }
}
