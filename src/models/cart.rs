use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::errors::ServiceError;

/// Product snapshot as the storefront cart sends it.
///
/// `price` and `quantity` are kept as raw JSON so that a malformed value is reported
/// against the product it belongs to instead of failing the whole body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProductPayload {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    #[schema(value_type = f64)]
    pub price: Value,
    #[serde(default)]
    pub intro: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartItemRequest {
    pub product: ProductPayload,
    #[serde(default)]
    #[schema(value_type = Option<u32>)]
    pub quantity: Option<Value>,
}

/// A validated cart line. Immutable input to the preference builder.
#[derive(Debug, Clone, PartialEq)]
pub struct CartLine {
    pub product_id: String,
    pub name: String,
    pub description: Option<String>,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub category: Option<String>,
}

impl CartLine {
    /// `None` when the product does not fit in a `Decimal`.
    pub fn line_total(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

/// Sum of `unit_price * quantity` over all lines. Overflow is reported against the
/// line that caused it.
pub fn cart_total(lines: &[CartLine]) -> Result<Decimal, ServiceError> {
    lines.iter().try_fold(Decimal::ZERO, |total, line| {
        line.line_total()
            .and_then(|amount| total.checked_add(amount))
            .ok_or_else(|| {
                ServiceError::invalid_input(format!("invalid price for product {}", line.name))
            })
    })
}

/// Parses a JSON price (number or numeric string). Returns `None` for anything that is
/// not a finite number; positivity is checked by the caller.
pub fn parse_price(value: &Value) -> Option<Decimal> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

/// Parses a JSON quantity. `None` means the field was absent or null.
pub fn parse_quantity(value: Option<&Value>) -> Option<Result<u32, ()>> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(
            n.as_u64()
                .filter(|q| *q >= 1)
                .and_then(|q| u32::try_from(q).ok())
                .ok_or(()),
        ),
        Some(Value::String(s)) => Some(
            s.trim()
                .parse::<u32>()
                .ok()
                .filter(|q| *q >= 1)
                .ok_or(()),
        ),
        Some(_) => Some(Err(())),
    }
}

/// Truncates on a character boundary.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}
