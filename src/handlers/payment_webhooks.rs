use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::Response,
};
use serde_json::json;

use super::common::success_response;
use crate::{
    services::payment_webhooks::{NotificationQuery, PaymentNotification, SignatureContext},
    AppState,
};

const SIGNATURE_HEADER: &str = "x-signature";
const PROVIDER_REQUEST_ID_HEADER: &str = "x-request-id";

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// POST /webhooks/payment
#[utoipa::path(
    post,
    path = "/webhooks/payment",
    summary = "Payment notification",
    description = "Receives Mercado Pago notifications and records an order for each approved payment",
    request_body = String,
    params(NotificationQuery),
    responses(
        (status = 200, description = "Notification acknowledged"),
        (status = 400, description = "Malformed notification", body = crate::errors::CheckoutErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::CheckoutErrorResponse),
        (status = 500, description = "Approved payment could not be recorded", body = crate::errors::CheckoutErrorResponse)
    ),
    tag = "Webhooks"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let diagnostics = state.config.diagnostics_enabled();

    let notification = match PaymentNotification::parse(&body, &query) {
        Ok(notification) => notification,
        Err(err) => return err.into_response_with(diagnostics),
    };
    let signature = SignatureContext {
        signature: header_value(&headers, SIGNATURE_HEADER),
        request_id: header_value(&headers, PROVIDER_REQUEST_ID_HEADER),
    };

    match state.webhooks.receive(&notification, &signature).await {
        Ok(outcome) => success_response(json!({
            "received": true,
            "outcome": outcome.label(),
        })),
        Err(err) => err.into_response_with(diagnostics),
    }
}

#[utoipa::path(
    get,
    path = "/webhooks/payment",
    summary = "Webhook probe",
    responses((status = 200, description = "Endpoint is reachable")),
    tag = "Webhooks"
)]
pub async fn webhook_probe() -> Response {
    success_response(json!({
        "message": "Payment webhook endpoint is up",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
