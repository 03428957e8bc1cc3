use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::{Validate, ValidationError};

use crate::models::Product;
use crate::services::metrics::MetricsSnapshot;
use crate::services::payment_request::RedirectPayload;

/// Body of `POST /create-payment`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[serde(default)]
    #[validate(custom(function = "validate_name"))]
    pub name: String,

    #[serde(default)]
    #[validate(custom(function = "validate_email"))]
    pub email: String,

    #[serde(default, alias = "course")]
    #[validate(custom(function = "validate_product"))]
    pub product: String,
}

impl CreatePaymentRequest {
    /// Product after validation. Never fails on a validated request.
    pub fn product(&self) -> Option<Product> {
        self.product.parse().ok()
    }
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    let len = name.trim().chars().count();
    if (2..=100).contains(&len) {
        Ok(())
    } else {
        let mut err = ValidationError::new("length");
        err.message = Some("Name must be between 2 and 100 characters".into());
        Err(err)
    }
}

/// Something, `@`, something, a dot, something. Whitespace is never allowed.
static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Failed to compile EMAIL_PATTERN")
});

fn validate_email(email: &str) -> Result<(), ValidationError> {
    if EMAIL_PATTERN.is_match(email.trim()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("email");
        err.message = Some("Invalid email format".into());
        Err(err)
    }
}

fn validate_product(product: &str) -> Result<(), ValidationError> {
    Product::from_str(product).map(|_| ()).map_err(|_| {
        let mut err = ValidationError::new("product");
        err.message = Some("Product must be one of: solo, support".into());
        err
    })
}

/// Everything a browser needs to post the hosted payment form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRedirectResponse {
    pub gateway_url: String,
    pub payload: RedirectPayload,
}

#[derive(Debug, Deserialize)]
pub struct PaymentStatusQuery {
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub status: String,
    pub order_id: String,
    pub product_description: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
    pub stored_orders: usize,
    pub notification_channels: Vec<&'static str>,
}
