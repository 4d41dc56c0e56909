//! Integration tests for `POST /checkout/pix`.
//!
//! Tests cover:
//! - Preference creation and the response contract
//! - Validation order and error bodies
//! - Idempotency-Key replay
//! - Provider failure mapping

mod common;

use axum::http::{Method, StatusCode};
use common::{cart_body, response_json, TestApp};
use serde_json::json;
use storefront_checkout::{config::AppConfig, errors::ServiceError};

#[tokio::test]
async fn test_checkout_creates_preference() {
    let app = TestApp::new();

    let response = app.post_json("/checkout/pix", cart_body()).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().contains_key("x-request-id"));

    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["preferenceId"], "pref-1");
    assert_eq!(body["checkoutUrl"], "https://mp.example/checkout/pref-1");
    assert_eq!(body["sandboxCheckoutUrl"], "https://sandbox.mp.example/checkout/pref-1");
    assert_eq!(body["orderNumber"], "ORDER-1001");
    assert_eq!(body["itemsCount"], 2);
    assert_eq!(body["totalAmount"].as_f64(), Some(125.3));

    let calls = app.gateway.preference_calls();
    assert_eq!(calls.len(), 1);
    let (preference, idempotency_key) = &calls[0];
    assert_eq!(idempotency_key, &preference.external_reference);
    assert_eq!(body["externalReference"], preference.external_reference.as_str());
    assert_eq!(preference.items.len(), 2);
    assert_eq!(preference.items[1].quantity, 1);
    assert_eq!(preference.payer.email, "ana@example.com");
    assert_eq!(
        preference.back_urls.success,
        "http://localhost:3000/success?orderNumber=ORDER-1001"
    );
    assert_eq!(preference.notification_url, "http://localhost:3000/webhooks/payment");
}

#[tokio::test]
async fn test_sandbox_checkout_url_preferred_when_configured() {
    let app = TestApp::with_config(AppConfig {
        use_sandbox_checkout: true,
        ..AppConfig::default()
    });

    let body = response_json(app.post_json("/checkout/pix", cart_body()).await).await;
    assert_eq!(body["checkoutUrl"], "https://sandbox.mp.example/checkout/pref-1");
}

#[tokio::test]
async fn test_empty_cart_is_rejected() {
    let app = TestApp::new();

    let response = app
        .post_json("/checkout/pix", json!({ "items": [], "metadata": {} }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "empty cart");
    assert!(body["suggestion"].is_string());
    assert!(app.gateway.preference_calls().is_empty());
}

#[tokio::test]
async fn test_incomplete_customer_data_is_rejected() {
    let app = TestApp::new();
    let mut body = cart_body();
    body["metadata"]["customerName"] = json!("   ");

    let response = app.post_json("/checkout/pix", body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["error"], "incomplete customer data");
}

#[tokio::test]
async fn test_invalid_price_rejects_whole_cart() {
    let app = TestApp::new();
    let mut body = cart_body();
    body["items"][1]["product"]["price"] = json!(0);

    let response = app.post_json("/checkout/pix", body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response_json(response).await["error"],
        "invalid price for product Caneca"
    );
    assert!(app.gateway.preference_calls().is_empty());
}

#[tokio::test]
async fn test_overflowing_price_is_a_bad_request_and_frees_the_key() {
    let app = TestApp::new();
    let mut body = cart_body();
    body["items"][1]["product"]["price"] = json!("79228162514264337593543950335");
    body["items"][1]["quantity"] = json!(2);
    let headers = [("idempotency-key", "cart-overflow")];

    let first = app
        .request(Method::POST, "/checkout/pix", Some(body.clone()), &headers)
        .await;
    assert_eq!(first.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response_json(first).await["error"],
        "invalid price for product Caneca"
    );

    let retry = app
        .request(Method::POST, "/checkout/pix", Some(body), &headers)
        .await;
    assert_eq!(retry.status(), StatusCode::BAD_REQUEST);
    assert!(app.gateway.preference_calls().is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let app = TestApp::new();

    let response = app
        .request(Method::POST, "/checkout/pix", None, &[("content-type", "application/json")])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["error"], "malformed request body");
}

#[tokio::test]
async fn test_missing_credential_is_a_server_error() {
    let app = TestApp::without_credential();

    let response = app.post_json("/checkout/pix", cart_body()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = response_json(response).await;
    assert_eq!(body["error"], "Payment configuration not found");
    assert!(!body.to_string().contains("access_token"));
}

#[tokio::test]
async fn test_provider_auth_failure_maps_to_401() {
    let app = TestApp::new();
    app.gateway.fail_preferences_with(ServiceError::UpstreamAuthError);

    let response = app.post_json("/checkout/pix", cart_body()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response_json(response).await["error"], "Authentication error");
}

#[tokio::test]
async fn test_production_errors_hide_diagnostics() {
    let app = TestApp::with_config(AppConfig {
        environment: "production".into(),
        mercadopago_access_token: Some("APP_USR-test".into()),
        ..AppConfig::default()
    });
    app.gateway
        .fail_preferences_with(ServiceError::upstream(Some(503), "upstream body with internals"));

    let response = app.post_json("/checkout/pix", cart_body()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = response_json(response).await;
    assert_eq!(body["error"], "Internal server error");
    assert!(body.get("debug_info").is_none());
    assert!(!body.to_string().contains("internals"));
}

#[tokio::test]
async fn test_idempotency_key_creates_one_preference() {
    let app = TestApp::new();
    let headers = [("idempotency-key", "cart-7f3a")];

    let first = app
        .request(Method::POST, "/checkout/pix", Some(cart_body()), &headers)
        .await;
    assert_eq!(first.status(), StatusCode::CREATED);
    let first_body = response_json(first).await;

    let second = app
        .request(Method::POST, "/checkout/pix", Some(cart_body()), &headers)
        .await;
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(
        second
            .headers()
            .get("idempotent-replayed")
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );
    assert_eq!(response_json(second).await, first_body);
    assert_eq!(app.gateway.preference_calls().len(), 1);
}

#[tokio::test]
async fn test_probe_reports_credential() {
    let app = TestApp::new();
    let body = response_json(app.request(Method::GET, "/checkout/pix", None, &[]).await).await;
    assert_eq!(body["hasCredential"], true);

    let app = TestApp::without_credential();
    let body = response_json(app.request(Method::GET, "/checkout/pix", None, &[]).await).await;
    assert_eq!(body["hasCredential"], false);
}
