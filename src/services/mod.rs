// Preference Builder
pub mod checkout;

// Webhook Receiver
pub mod payment_webhooks;
pub mod webhook_signature;

// Retry queue worker
pub mod payment_recovery;
