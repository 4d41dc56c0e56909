use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront Checkout API",
        version = "1.0.0",
        description = r#"
# Storefront Checkout API

PIX checkout for the storefront, backed by Mercado Pago.

- `POST /checkout/pix` turns a cart into a Mercado Pago checkout preference.
- `POST /webhooks/payment` receives Mercado Pago notifications and records one paid
  order per approved payment.

## Idempotency

`POST /checkout/pix` honours the `Idempotency-Key` header. Repeating a request with the
same key replays the first response and sets `Idempotent-Replayed: true`.

## Error Handling

```json
{
  "success": false,
  "error": "empty cart",
  "details": "the item list is empty or missing",
  "suggestion": "Add products to the cart before checking out",
  "request_id": "5f0c..."
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Checkout", description = "Checkout preference endpoints"),
        (name = "Webhooks", description = "Payment provider notifications"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::checkout::create_pix_checkout,
        crate::handlers::checkout::checkout_probe,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::payment_webhooks::webhook_probe,
        crate::handlers::health::liveness_check,
    ),
    components(
        schemas(
            crate::services::checkout::CheckoutRequest,
            crate::services::checkout::CheckoutResponse,
            crate::models::ProductPayload,
            crate::models::CartItemRequest,
            crate::models::CustomerMetadataPayload,
            crate::models::ShippingAddress,
            crate::models::Order,
            crate::models::OrderStatus,
            crate::errors::CheckoutErrorResponse
        )
    )
)]
pub struct ApiDoc;
