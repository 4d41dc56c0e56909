use chrono::Utc;
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use utoipa::IntoParams;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    message_queue::{Message, MessageQueue, PAYMENT_REPROCESS_TOPIC},
    models::{customer::non_blank, CheckoutAttemptState, Order, OrderStatus},
    providers::mercadopago::{PaymentGateway, PaymentRecord, PaymentStatus},
    services::webhook_signature::{self, SignatureError},
    store::{InsertOutcome, OrderStore},
};

const PAYMENT_TOPIC: &str = "payment";
const FALLBACK_CUSTOMER_NAME: &str = "Cliente";
const FALLBACK_PAYMENT_METHOD: &str = "pix";
const MAX_PAYMENT_ID_LEN: usize = 64;

/// Query parameters the provider may append to the notification URL.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NotificationQuery {
    #[serde(rename = "data.id")]
    pub data_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub topic: Option<String>,
    pub id: Option<String>,
}

/// A payment notification reduced to the fields the receiver acts on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentNotification {
    pub kind: Option<String>,
    pub action: Option<String>,
    pub data_id: Option<String>,
}

fn id_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl PaymentNotification {
    /// Reads the JSON body, falling back to query parameters for fields it lacks.
    /// An empty body is accepted; anything else that is not a JSON object is malformed.
    pub fn parse(body: &[u8], query: &NotificationQuery) -> Result<Self, ServiceError> {
        let value: Value = if body.iter().all(u8::is_ascii_whitespace) {
            json!({})
        } else {
            serde_json::from_slice(body)
                .map_err(|e| ServiceError::MalformedNotification(e.to_string()))?
        };
        let object = value
            .as_object()
            .ok_or_else(|| ServiceError::MalformedNotification("expected a JSON object".into()))?;

        let text = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let query_id = |value: &Option<String>| non_blank(value).map(str::to_string);

        Ok(Self {
            kind: text("type")
                .or_else(|| text("topic"))
                .or_else(|| query_id(&query.kind))
                .or_else(|| query_id(&query.topic)),
            action: text("action"),
            data_id: id_value(object.get("data").and_then(|d| d.get("id")))
                .or_else(|| query_id(&query.data_id))
                .or_else(|| query_id(&query.id)),
        })
    }

    pub fn is_payment(&self) -> bool {
        self.kind.as_deref() == Some(PAYMENT_TOPIC)
    }
}

/// Provider payment ids are plain ASCII alphanumerics. Anything else never reaches the
/// lookup URL.
pub fn is_valid_payment_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_PAYMENT_ID_LEN && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Failures worth another lookup later. A rejected credential is included because it is
/// usually fixed by rotating the token.
pub(crate) fn is_deferrable(err: &ServiceError) -> bool {
    err.is_retryable() || matches!(err, ServiceError::UpstreamAuthError)
}

/// Header values needed to check a signed notification.
#[derive(Debug, Clone, Default)]
pub struct SignatureContext {
    pub signature: Option<String>,
    pub request_id: Option<String>,
}

/// What the receiver did with a notification. Every variant is acknowledged with 200.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Ignored { kind: Option<String> },
    Recorded { order_number: String },
    Duplicate,
    PaymentNotApproved { status: PaymentStatus },
    /// Lookup failed; the payment was queued for reprocessing.
    Deferred,
    /// Lookup failed in a way another attempt cannot fix; nothing was queued.
    Unresolved,
}

impl WebhookOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ignored { .. } => "ignored",
            Self::Recorded { .. } => "recorded",
            Self::Duplicate => "duplicate",
            Self::PaymentNotApproved { .. } => "not_approved",
            Self::Deferred => "deferred",
            Self::Unresolved => "unresolved",
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReprocessPayload {
    pub payment_id: String,
}

/// Confirms payments reported by the provider and records one order per payment.
#[derive(Clone)]
pub struct PaymentWebhookService {
    gateway: Option<Arc<dyn PaymentGateway>>,
    store: Arc<dyn OrderStore>,
    retry_queue: Arc<dyn MessageQueue>,
    config: Arc<AppConfig>,
}

impl PaymentWebhookService {
    pub fn new(
        gateway: Option<Arc<dyn PaymentGateway>>,
        store: Arc<dyn OrderStore>,
        retry_queue: Arc<dyn MessageQueue>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            gateway,
            store,
            retry_queue,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    pub fn retry_queue(&self) -> &Arc<dyn MessageQueue> {
        &self.retry_queue
    }

    #[instrument(skip(self, notification, signature), fields(kind = ?notification.kind, data_id = ?notification.data_id))]
    pub async fn receive(
        &self,
        notification: &PaymentNotification,
        signature: &SignatureContext,
    ) -> Result<WebhookOutcome, ServiceError> {
        self.verify_signature(notification, signature)?;

        if !notification.is_payment() {
            counter!("webhooks.notifications.ignored", 1);
            info!(action = ?notification.action, "notification ignored");
            return Ok(WebhookOutcome::Ignored {
                kind: notification.kind.clone(),
            });
        }

        let payment_id = notification
            .data_id
            .as_deref()
            .ok_or(ServiceError::PaymentIdMissing)?;
        if !is_valid_payment_id(payment_id) {
            counter!("webhooks.notifications.rejected", 1);
            warn!("notification carries an unusable payment id");
            return Err(ServiceError::MalformedNotification("invalid payment id".into()));
        }

        self.process_or_defer(payment_id).await
    }

    fn verify_signature(
        &self,
        notification: &PaymentNotification,
        signature: &SignatureContext,
    ) -> Result<(), ServiceError> {
        let Some(secret) = self.config.webhook_secret() else {
            return Ok(());
        };

        webhook_signature::verify(
            secret,
            signature.signature.as_deref(),
            notification.data_id.as_deref(),
            signature.request_id.as_deref(),
            self.config.webhook_tolerance_secs,
            Utc::now().timestamp(),
        )
        .map_err(|reason: SignatureError| {
            warn!(?reason, "payment webhook signature verification failed");
            ServiceError::InvalidSignature
        })
    }

    async fn process_or_defer(&self, payment_id: &str) -> Result<WebhookOutcome, ServiceError> {
        match self.process_payment(payment_id).await {
            Ok(outcome) => Ok(outcome),
            Err(ServiceError::PersistenceError(msg)) => {
                error!(
                    payment_id,
                    error = %msg,
                    "approved payment could not be recorded"
                );
                match self.enqueue_retry(payment_id).await {
                    Ok(()) => Err(ServiceError::PersistenceError(msg)),
                    Err(queue_err) => Err(ServiceError::PersistenceError(format!(
                        "{}; retry queue also failed: {}",
                        msg, queue_err
                    ))),
                }
            }
            Err(err) if is_deferrable(&err) => {
                warn!(payment_id, error = %err, "payment lookup failed; deferring");
                self.enqueue_retry(payment_id).await.map_err(|_| err)?;
                Ok(WebhookOutcome::Deferred)
            }
            Err(err @ ServiceError::UpstreamError { .. }) => {
                counter!("webhooks.payments.unresolved", 1);
                error!(
                    payment_id,
                    error = %err,
                    "payment lookup cannot succeed; not queued for reprocessing"
                );
                Ok(WebhookOutcome::Unresolved)
            }
            Err(err) => Err(err),
        }
    }

    async fn enqueue_retry(&self, payment_id: &str) -> Result<(), ServiceError> {
        let message = Message::new(PAYMENT_REPROCESS_TOPIC, json!({ "payment_id": payment_id }))
            .with_max_retries(self.config.recovery_max_attempts);
        match self.retry_queue.publish(message).await {
            Ok(()) => {
                counter!("webhooks.retry.enqueued", 1);
                info!(payment_id, "payment queued for reprocessing");
                Ok(())
            }
            Err(e) => {
                error!(payment_id, error = %e, "failed to queue payment for reprocessing");
                Err(ServiceError::PersistenceError(e.to_string()))
            }
        }
    }

    /// Looks the payment up and records an order if it is approved. Safe to repeat for
    /// the same payment id; at most one order is ever stored for it.
    #[instrument(skip(self))]
    pub async fn process_payment(&self, payment_id: &str) -> Result<WebhookOutcome, ServiceError> {
        let gateway = self.gateway.as_ref().ok_or_else(|| {
            ServiceError::ConfigurationError("Mercado Pago access token is not configured".into())
        })?;

        let payment = gateway.get_payment(payment_id).await?;
        let state = CheckoutAttemptState::after_payment_status(&payment.status);
        debug!(status = %payment.status, %state, terminal = state.is_terminal(), "payment looked up");

        if payment.status != PaymentStatus::Approved {
            counter!("webhooks.payments.not_approved", 1);
            warn!(
                payment_id,
                status = %payment.status,
                status_detail = ?payment.status_detail,
                %state,
                "payment not approved; no order recorded"
            );
            return Ok(WebhookOutcome::PaymentNotApproved {
                status: payment.status,
            });
        }

        if self.store.find_by_payment_id(&payment.id).await?.is_some() {
            counter!("webhooks.orders.duplicate", 1);
            info!(payment_id, "order already recorded for payment");
            return Ok(WebhookOutcome::Duplicate);
        }

        let order = order_from_payment(&payment, &self.config.currency)?;
        match self.store.insert_if_absent(&order).await? {
            InsertOutcome::Created => {
                counter!("webhooks.orders.recorded", 1);
                info!(
                    payment_id,
                    order_number = %order.order_number,
                    total = %order.total_price,
                    backend = self.store.backend(),
                    "order recorded"
                );
                Ok(WebhookOutcome::Recorded {
                    order_number: order.order_number,
                })
            }
            InsertOutcome::AlreadyExists => {
                counter!("webhooks.orders.duplicate", 1);
                info!(payment_id, "concurrent delivery already recorded the order");
                Ok(WebhookOutcome::Duplicate)
            }
        }
    }
}

/// Builds the order document from the authoritative payment record.
pub fn order_from_payment(
    payment: &PaymentRecord,
    default_currency: &str,
) -> Result<Order, ServiceError> {
    let total_price = payment
        .transaction_amount
        .ok_or_else(|| ServiceError::UpstreamError {
            status: None,
            message: format!("approved payment {} has no transaction amount", payment.id),
            retryable: false,
        })?;

    let metadata = payment.metadata();
    let payer_email = payment.payer.as_ref().and_then(|p| non_blank(&p.email));
    let payer_first_name = payment
        .additional_info
        .as_ref()
        .and_then(|info| info.payer.as_ref())
        .and_then(|p| non_blank(&p.first_name))
        .or_else(|| payment.payer.as_ref().and_then(|p| non_blank(&p.first_name)));

    let external_reference = non_blank(&payment.external_reference)
        .or_else(|| non_blank(&metadata.correlation_token))
        .unwrap_or_default()
        .to_string();
    let order_number = non_blank(&metadata.order_number)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if external_reference.is_empty() {
                payment.id.clone()
            } else {
                external_reference.clone()
            }
        });

    Ok(Order {
        order_number,
        external_reference,
        payment_id: payment.id.clone(),
        customer_name: non_blank(&metadata.customer_name)
            .or(payer_first_name)
            .unwrap_or(FALLBACK_CUSTOMER_NAME)
            .to_string(),
        customer_email: non_blank(&metadata.customer_email)
            .or(payer_email)
            .unwrap_or_default()
            .to_string(),
        customer_phone: non_blank(&metadata.customer_phone).map(str::to_string),
        shipping_address: metadata.shipping_address(),
        external_user_id: non_blank(&metadata.external_user_id).map(str::to_string),
        total_price,
        currency: non_blank(&payment.currency_id)
            .unwrap_or(default_currency)
            .to_string(),
        status: OrderStatus::Paid,
        payment_method: non_blank(&payment.payment_method_id)
            .unwrap_or(FALLBACK_PAYMENT_METHOD)
            .to_string(),
        payment_type_id: non_blank(&payment.payment_type_id).map(str::to_string),
        provider_raw_status: payment.raw_status(),
        date_approved: payment.date_approved,
        created_at: Utc::now(),
    })
}
