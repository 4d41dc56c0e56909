use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::ShippingAddress;

/// Body of `POST /checkout/preferences`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PreferenceRequest {
    pub items: Vec<PreferenceItem>,
    pub payer: PreferencePayer,
    pub back_urls: BackUrls,
    pub auto_return: String,
    pub payment_methods: PaymentMethods,
    pub notification_url: String,
    pub statement_descriptor: String,
    pub external_reference: String,
    pub expires: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date_to: Option<String>,
    pub binary_mode: bool,
    pub metadata: PreferenceMetadata,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PreferenceItem {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub category_id: String,
    pub quantity: u32,
    pub currency_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PreferencePayer {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BackUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IdRef {
    pub id: String,
}

impl IdRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentMethods {
    pub excluded_payment_methods: Vec<IdRef>,
    pub excluded_payment_types: Vec<IdRef>,
    pub installments: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_payment_method_id: Option<String>,
}

/// Metadata the provider stores with the preference and echoes on the payment.
///
/// The provider rewrites metadata keys to snake_case, so they are sent that way.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PreferenceMetadata {
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub correlation_token: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default, alias = "clerk_user_id")]
    pub external_user_id: Option<String>,
    /// JSON-encoded [`ShippingAddress`]; strings pass through the provider untouched.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "customer_address")]
    pub shipping_address: Option<Value>,
}

impl PreferenceMetadata {
    /// Reads metadata leniently: unknown or mistyped keys fall back to empty.
    pub fn from_value(value: Option<&Value>) -> Self {
        value
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn shipping_address(&self) -> Option<ShippingAddress> {
        match self.shipping_address.as_ref()? {
            Value::String(raw) => serde_json::from_str(raw).ok(),
            obj @ Value::Object(_) => serde_json::from_value(obj.clone()).ok(),
            _ => None,
        }
    }
}

/// Response of `POST /checkout/preferences`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct PreferenceResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub init_point: Option<String>,
    #[serde(default)]
    pub sandbox_init_point: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
}

/// Payment status as reported by `GET /v1/payments/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Authorized,
    InProcess,
    InMediation,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct PaymentPayer {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AdditionalInfo {
    #[serde(default)]
    pub payer: Option<PaymentPayer>,
}

/// Authoritative payment record
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PaymentRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub status: PaymentStatus,
    #[serde(default)]
    pub status_detail: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub transaction_amount: Option<Decimal>,
    #[serde(default)]
    pub currency_id: Option<String>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    pub payment_type_id: Option<String>,
    #[serde(default)]
    pub date_approved: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payer: Option<PaymentPayer>,
    #[serde(default)]
    pub additional_info: Option<AdditionalInfo>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl PaymentRecord {
    pub fn metadata(&self) -> PreferenceMetadata {
        PreferenceMetadata::from_value(self.metadata.as_ref())
    }

    /// `status` plus `status_detail`, as stored on the order for auditing
    pub fn raw_status(&self) -> String {
        match self.status_detail.as_deref() {
            Some(detail) if !detail.is_empty() => format!("{}/{}", self.status, detail),
            _ => self.status.to_string(),
        }
    }
}

/// Notification ids and payment ids arrive as either JSON strings or numbers.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}
