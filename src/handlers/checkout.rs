use axum::{body::Bytes, extract::State, response::Response};
use serde_json::{json, Value};
use tracing::warn;

use super::common::{created_response, success_response};
use crate::{errors::ServiceError, AppState};

/// Creates a PIX checkout preference for the submitted cart.
#[utoipa::path(
    post,
    path = "/checkout/pix",
    summary = "Create PIX checkout",
    description = "Validates the cart and customer data and creates a Mercado Pago checkout preference",
    request_body = crate::services::checkout::CheckoutRequest,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Replays the first response for repeated submissions")
    ),
    responses(
        (status = 201, description = "Preference created", body = crate::services::checkout::CheckoutResponse,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid cart or customer data", body = crate::errors::CheckoutErrorResponse),
        (status = 401, description = "Provider rejected the credential", body = crate::errors::CheckoutErrorResponse),
        (status = 409, description = "A request with the same Idempotency-Key is in progress", body = crate::errors::CheckoutErrorResponse),
        (status = 500, description = "Configuration or provider failure", body = crate::errors::CheckoutErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_pix_checkout(State(state): State<AppState>, body: Bytes) -> Response {
    let diagnostics = state.config.diagnostics_enabled();

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "checkout body is not valid JSON");
            return ServiceError::invalid_input("malformed request body").into_response_with(diagnostics);
        }
    };

    match state.checkout.create_pix_checkout(&payload).await {
        Ok(response) => created_response(response),
        Err(err) => err.into_response_with(diagnostics),
    }
}

#[utoipa::path(
    get,
    path = "/checkout/pix",
    summary = "Checkout probe",
    responses((status = 200, description = "Endpoint is reachable")),
    tag = "Checkout"
)]
pub async fn checkout_probe(State(state): State<AppState>) -> Response {
    success_response(json!({
        "message": "PIX checkout endpoint is up",
        "hasCredential": state.checkout.has_credential(),
    }))
}
