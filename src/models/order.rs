use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::customer::ShippingAddress;
use crate::providers::mercadopago::PaymentStatus;

/// Status of a persisted order.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
}

/// Lifecycle of one checkout attempt, keyed by order number.
///
/// Only `Paid` results in a stored order; the other states are observed in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckoutAttemptState {
    Created,
    AwaitingConfirmation,
    Paid,
    Abandoned,
    Failed,
}

impl CheckoutAttemptState {
    /// State reached once the provider reports `status` for the attempt's payment.
    pub fn after_payment_status(status: &PaymentStatus) -> Self {
        match status {
            PaymentStatus::Approved => Self::Paid,
            PaymentStatus::Rejected | PaymentStatus::Cancelled => Self::Failed,
            PaymentStatus::Refunded | PaymentStatus::ChargedBack => Self::Failed,
            PaymentStatus::Pending
            | PaymentStatus::Authorized
            | PaymentStatus::InProcess
            | PaymentStatus::InMediation
            | PaymentStatus::Unknown => Self::AwaitingConfirmation,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Abandoned | Self::Failed)
    }
}

/// Order document written to the content store after a confirmed payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_number: String,
    /// Correlation token sent as the preference's external reference
    pub external_reference: String,
    pub payment_id: String,
    pub customer_name: String,
    pub customer_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<ShippingAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_user_id: Option<String>,
    /// Amount reported by the provider, never the client-side total
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_price: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_type_id: Option<String>,
    pub provider_raw_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_approved: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
