use axum::response::{IntoResponse, Json};
use serde_json::json;

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    summary = "Liveness probe",
    responses((status = 200, description = "Service is running")),
    tag = "Health"
)]
pub async fn liveness_check() -> impl IntoResponse {
    Json(json!({
        "status": "up",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
