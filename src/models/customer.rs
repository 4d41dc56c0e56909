use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Delivery address collected by the checkout form.
///
/// Accepts the Portuguese keys the storefront form produces as aliases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    #[serde(default, alias = "nome", alias = "recipient_name", skip_serializing_if = "Option::is_none")]
    pub recipient_name: Option<String>,
    #[serde(default, alias = "rua")]
    pub street: String,
    #[serde(default, alias = "numero")]
    pub number: String,
    #[serde(default, alias = "complemento", skip_serializing_if = "Option::is_none")]
    pub complement: Option<String>,
    #[serde(default, alias = "bairro")]
    pub neighborhood: String,
    #[serde(default, alias = "cidade")]
    pub city: String,
    #[serde(default, alias = "estado")]
    pub state: String,
    #[serde(default, alias = "cep", alias = "postal_code")]
    pub postal_code: String,
    #[serde(default = "default_country", alias = "pais")]
    pub country: String,
}

fn default_country() -> String {
    "Brasil".to_string()
}

/// Customer metadata exactly as posted; every field may be missing. A field of the
/// wrong type reads as missing instead of discarding the rest of the object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomerMetadataPayload {
    #[serde(default, deserialize_with = "lenient_text")]
    pub order_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub customer_email: Option<String>,
    #[serde(default, alias = "clerkUserId", deserialize_with = "lenient_text")]
    pub external_user_id: Option<String>,
    #[serde(default, alias = "telefone", deserialize_with = "lenient_text")]
    pub customer_phone: Option<String>,
    #[serde(default, deserialize_with = "lenient_address")]
    pub shipping_address: Option<ShippingAddress>,
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn lenient_address<'de, D>(deserializer: D) -> Result<Option<ShippingAddress>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        value @ Value::Object(_) => Ok(serde_json::from_value(value).ok()),
        _ => Ok(None),
    }
}

/// Validated customer metadata. `order_number` correlates the preference, the provider
/// callback and the persisted order.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerMetadata {
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub external_user_id: Option<String>,
    pub customer_phone: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
}

pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
