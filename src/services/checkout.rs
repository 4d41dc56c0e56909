use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    models::{
        cart::{cart_total, parse_price, parse_quantity, truncate_chars},
        customer::non_blank,
        CartItemRequest, CartLine, CheckoutAttemptState, CustomerMetadata,
        CustomerMetadataPayload,
    },
    providers::mercadopago::{
        BackUrls, IdRef, PaymentGateway, PaymentMethods, PreferenceItem, PreferenceMetadata,
        PreferencePayer, PreferenceRequest, PreferenceResponse,
    },
};

const UNNAMED_PRODUCT_TITLE: &str = "Produto sem nome";
const DEFAULT_ITEM_DESCRIPTION: &str = "Produto da loja";
const TOKEN_SUFFIX_LEN: usize = 9;
const PIX_EXCLUDED_PAYMENT_TYPES: [&str; 3] = ["credit_card", "debit_card", "ticket"];

/// Documented shape of `POST /checkout/pix`. The service reads the body leniently so
/// that each validation step reports its own error.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub items: Vec<CartItemRequest>,
    pub metadata: CustomerMetadataPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub success: bool,
    pub preference_id: String,
    pub checkout_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_checkout_url: Option<String>,
    /// Σ unit price × quantity, for display only
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_amount: Decimal,
    pub order_number: String,
    /// Correlation token echoed back by the provider on the payment
    pub external_reference: String,
    pub items_count: usize,
}

/// Builds hosted-checkout preferences for storefront carts.
#[derive(Clone)]
pub struct CheckoutService {
    gateway: Option<Arc<dyn PaymentGateway>>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(gateway: Option<Arc<dyn PaymentGateway>>, config: Arc<AppConfig>) -> Self {
        Self { gateway, config }
    }

    pub fn has_credential(&self) -> bool {
        self.gateway.is_some()
    }

    /// Validates the cart, creates one remote preference and returns its checkout URLs.
    ///
    /// Validation is fail-fast in this order: empty cart, customer data, provider
    /// credential, then each item's price and quantity. Nothing is sent to the provider
    /// unless every step passes.
    #[instrument(skip(self, body))]
    pub async fn create_pix_checkout(&self, body: &Value) -> Result<CheckoutResponse, ServiceError> {
        let result = self.create_inner(body).await;
        if let Err(err) = &result {
            counter!("checkout.preferences.rejected", 1);
            warn!(
                status = err.status_code().as_u16(),
                retryable = err.is_retryable(),
                error = %err,
                "checkout preference not created"
            );
        }
        result
    }

    async fn create_inner(&self, body: &Value) -> Result<CheckoutResponse, ServiceError> {
        let raw_items = cart_items(body)?;
        let customer = customer_metadata(body)?;
        let gateway = self.gateway.as_ref().ok_or_else(|| {
            ServiceError::ConfigurationError("Mercado Pago access token is not configured".into())
        })?;
        let lines = cart_lines(raw_items)?;

        let total = cart_total(&lines)?;
        let token = correlation_token(&customer.order_number);
        let preference = build_preference(&self.config, &lines, &customer, &token);

        info!(
            order_number = %customer.order_number,
            items = lines.len(),
            total = %total,
            gateway = gateway.name(),
            "creating checkout preference"
        );
        let created = gateway.create_preference(&preference, &token).await?;
        let response = self.checkout_response(created, &customer, &token, total, lines.len())?;

        counter!("checkout.preferences.created", 1);
        info!(
            order_number = %response.order_number,
            preference_id = %response.preference_id,
            state = %CheckoutAttemptState::Created,
            "checkout preference created"
        );
        Ok(response)
    }

    fn checkout_response(
        &self,
        created: PreferenceResponse,
        customer: &CustomerMetadata,
        token: &str,
        total: Decimal,
        items_count: usize,
    ) -> Result<CheckoutResponse, ServiceError> {
        let preference_id = created
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ServiceError::upstream(None, "provider returned no preference id"))?;

        let production = created.init_point.filter(|u| !u.is_empty());
        let sandbox = created.sandbox_init_point.filter(|u| !u.is_empty());
        let checkout_url = if self.config.use_sandbox_checkout {
            sandbox.clone().or_else(|| production.clone())
        } else {
            production.clone().or_else(|| sandbox.clone())
        }
        .ok_or_else(|| ServiceError::upstream(None, "provider returned no checkout url"))?;

        Ok(CheckoutResponse {
            success: true,
            preference_id,
            checkout_url,
            sandbox_checkout_url: sandbox,
            total_amount: total,
            order_number: customer.order_number.clone(),
            external_reference: token.to_string(),
            items_count,
        })
    }
}

fn cart_items(body: &Value) -> Result<&Vec<Value>, ServiceError> {
    body.get("items")
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty())
        .ok_or_else(|| ServiceError::invalid_input("empty cart"))
}

fn customer_metadata(body: &Value) -> Result<CustomerMetadata, ServiceError> {
    let payload: CustomerMetadataPayload = body
        .get("metadata")
        .and_then(|m| serde_json::from_value(m.clone()).ok())
        .unwrap_or_default();

    let (Some(email), Some(name)) = (
        non_blank(&payload.customer_email),
        non_blank(&payload.customer_name),
    ) else {
        return Err(ServiceError::invalid_input("incomplete customer data"));
    };
    if !validator::validate_email(email) {
        return Err(ServiceError::invalid_input("invalid customer email"));
    }

    let order_number = non_blank(&payload.order_number)
        .map(str::to_string)
        .unwrap_or_else(generated_order_number);

    Ok(CustomerMetadata {
        order_number,
        customer_name: name.to_string(),
        customer_email: email.to_string(),
        external_user_id: non_blank(&payload.external_user_id).map(str::to_string),
        customer_phone: non_blank(&payload.customer_phone).map(str::to_string),
        shipping_address: payload.shipping_address,
    })
}

/// Converts raw cart items into validated lines. Any invalid item rejects the batch.
pub fn cart_lines(raw_items: &[Value]) -> Result<Vec<CartLine>, ServiceError> {
    raw_items
        .iter()
        .enumerate()
        .map(|(position, raw)| {
            let item: CartItemRequest = serde_json::from_value(raw.clone()).map_err(|_| {
                ServiceError::invalid_input(format!("invalid cart item at position {}", position + 1))
            })?;
            cart_line(item)
        })
        .collect()
}

fn cart_line(item: CartItemRequest) -> Result<CartLine, ServiceError> {
    let product = item.product;
    let label = non_blank(&product.name)
        .or_else(|| non_blank(&product.id))
        .unwrap_or("<unnamed>")
        .to_string();

    let unit_price = parse_price(&product.price)
        .filter(|price| *price > Decimal::ZERO)
        .ok_or_else(|| ServiceError::invalid_input(format!("invalid price for product {}", label)))?;

    let quantity = match parse_quantity(item.quantity.as_ref()) {
        None => 1,
        Some(Ok(quantity)) => quantity,
        Some(Err(())) => {
            return Err(ServiceError::invalid_input(format!(
                "invalid quantity for product {}",
                label
            )))
        }
    };
    if unit_price.checked_mul(Decimal::from(quantity)).is_none() {
        return Err(ServiceError::invalid_input(format!(
            "invalid price for product {}",
            label
        )));
    }

    Ok(CartLine {
        product_id: non_blank(&product.id).unwrap_or_default().to_string(),
        name: non_blank(&product.name)
            .unwrap_or(UNNAMED_PRODUCT_TITLE)
            .to_string(),
        description: non_blank(&product.intro)
            .or_else(|| non_blank(&product.description))
            .map(str::to_string),
        unit_price,
        quantity,
        category: non_blank(&product.category).map(str::to_string),
    })
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

fn generated_order_number() -> String {
    format!("ORDER-{}-{}", Utc::now().timestamp_millis(), random_suffix())
}

/// `<orderNumber>-<unix millis>-<9 random chars>`, fresh for every call.
pub fn correlation_token(order_number: &str) -> String {
    format!(
        "{}-{}-{}",
        order_number,
        Utc::now().timestamp_millis(),
        random_suffix()
    )
}

/// Maps validated lines and customer data into the provider's preference payload.
pub fn build_preference(
    config: &AppConfig,
    lines: &[CartLine],
    customer: &CustomerMetadata,
    correlation_token: &str,
) -> PreferenceRequest {
    let items = lines
        .iter()
        .map(|line| PreferenceItem {
            id: line.product_id.clone(),
            title: truncate_chars(&line.name, config.max_title_length),
            description: line
                .description
                .clone()
                .unwrap_or_else(|| DEFAULT_ITEM_DESCRIPTION.to_string()),
            category_id: line
                .category
                .clone()
                .unwrap_or_else(|| config.default_category.clone()),
            quantity: line.quantity,
            currency_id: config.currency.clone(),
            unit_price: line.unit_price,
        })
        .collect();

    let base = config.base_url();
    let payment_methods = if config.pix_only {
        PaymentMethods {
            excluded_payment_methods: Vec::new(),
            excluded_payment_types: PIX_EXCLUDED_PAYMENT_TYPES
                .iter()
                .copied()
                .map(IdRef::new)
                .collect(),
            installments: 1,
            default_payment_method_id: Some("pix".to_string()),
        }
    } else {
        PaymentMethods {
            excluded_payment_methods: Vec::new(),
            excluded_payment_types: Vec::new(),
            installments: 1,
            default_payment_method_id: None,
        }
    };

    let (expires, expiration_date_from, expiration_date_to) =
        match config.preference_expiration_minutes {
            Some(minutes) => {
                let from = Utc::now();
                let to = from + ChronoDuration::minutes(i64::from(minutes));
                let fmt = "%Y-%m-%dT%H:%M:%S%.3f%:z";
                (
                    true,
                    Some(from.format(fmt).to_string()),
                    Some(to.format(fmt).to_string()),
                )
            }
            None => (false, None, None),
        };

    let shipping_address = customer
        .shipping_address
        .as_ref()
        .and_then(|address| serde_json::to_string(address).ok())
        .map(Value::String);

    PreferenceRequest {
        items,
        payer: PreferencePayer {
            name: customer.customer_name.clone(),
            email: customer.customer_email.clone(),
        },
        back_urls: BackUrls {
            success: format!("{}/success?orderNumber={}", base, customer.order_number),
            failure: format!("{}/cart", base),
            pending: format!("{}/cart", base),
        },
        auto_return: "approved".to_string(),
        payment_methods,
        notification_url: config.notification_url(),
        statement_descriptor: config.statement_descriptor.clone(),
        external_reference: correlation_token.to_string(),
        expires,
        expiration_date_from,
        expiration_date_to,
        binary_mode: false,
        metadata: PreferenceMetadata {
            order_number: Some(customer.order_number.clone()),
            correlation_token: Some(correlation_token.to_string()),
            customer_name: Some(customer.customer_name.clone()),
            customer_email: Some(customer.customer_email.clone()),
            customer_phone: customer.customer_phone.clone(),
            external_user_id: customer.external_user_id.clone(),
            shipping_address,
        },
    }
}
