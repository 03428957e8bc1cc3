//! Builds signed hosted-payment requests and records the pending order.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::config::MerchantConfig;
use crate::models::{Catalog, Order, Product};
use crate::services::metrics::PaymentMetrics;
use crate::services::signature::{SignatureEngine, SignatureError, SignatureField};
use crate::services::store::{OrderStore, StorageError};

pub const MERCHANT_AUTH_TYPE: &str = "SimpleSignature";
pub const RETURN_PATH: &str = "/payment-return";
pub const SERVICE_PATH: &str = "/server-callback";

#[derive(Debug, Error)]
pub enum PaymentRequestError {
    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Form fields posted by the browser to the gateway's hosted page.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedirectPayload {
    pub merchant_account: String,
    pub merchant_auth_type: String,
    pub merchant_domain_name: String,
    pub order_reference: String,
    pub order_date: i64,
    pub amount: Decimal,
    pub currency: String,
    pub product_name: Vec<String>,
    pub product_count: Vec<u32>,
    pub product_price: Vec<Decimal>,
    pub client_first_name: String,
    pub client_email: String,
    pub language: String,
    pub return_url: String,
    pub service_url: String,
    pub merchant_signature: String,
}

impl RedirectPayload {
    /// Signed purchase fields in gateway order.
    pub fn signed_fields(&self) -> Vec<SignatureField> {
        let mut fields = vec![
            SignatureField::from(&self.merchant_account),
            SignatureField::from(&self.merchant_domain_name),
            SignatureField::from(&self.order_reference),
            SignatureField::from(self.order_date),
            SignatureField::from(self.amount),
            SignatureField::from(&self.currency),
        ];
        fields.extend(self.product_name.iter().map(SignatureField::from));
        fields.extend(self.product_count.iter().copied().map(SignatureField::from));
        fields.extend(self.product_price.iter().copied().map(SignatureField::from));
        fields
    }

    /// Flatten into ordered `(name, value)` pairs for an auto-submitting form.
    /// Array fields repeat with a `[]` suffix.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = vec![
            ("merchantAccount".into(), self.merchant_account.clone()),
            ("merchantAuthType".into(), self.merchant_auth_type.clone()),
            ("merchantDomainName".into(), self.merchant_domain_name.clone()),
            ("orderReference".into(), self.order_reference.clone()),
            ("orderDate".into(), self.order_date.to_string()),
            ("amount".into(), self.amount.normalize().to_string()),
            ("currency".into(), self.currency.clone()),
        ];
        for name in &self.product_name {
            pairs.push(("productName[]".into(), name.clone()));
        }
        for count in &self.product_count {
            pairs.push(("productCount[]".into(), count.to_string()));
        }
        for price in &self.product_price {
            pairs.push(("productPrice[]".into(), price.normalize().to_string()));
        }
        pairs.extend([
            ("clientFirstName".into(), self.client_first_name.clone()),
            ("clientEmail".into(), self.client_email.clone()),
            ("language".into(), self.language.clone()),
            ("returnUrl".into(), self.return_url.clone()),
            ("serviceUrl".into(), self.service_url.clone()),
            ("merchantSignature".into(), self.merchant_signature.clone()),
        ]);
        pairs
    }
}

/// `ORDER-<unix millis>-<5 lowercase alphanumerics>`
pub fn generate_order_reference(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("ORDER-{}-{}", now.timestamp_millis(), suffix)
}

#[derive(Clone)]
pub struct PaymentRequestBuilder {
    merchant: MerchantConfig,
    catalog: Catalog,
    public_base_url: String,
    signer: SignatureEngine,
    store: OrderStore,
    metrics: PaymentMetrics,
}

impl PaymentRequestBuilder {
    pub fn new(
        merchant: MerchantConfig,
        catalog: Catalog,
        public_base_url: String,
        store: OrderStore,
        metrics: PaymentMetrics,
    ) -> Self {
        let signer = SignatureEngine::new(merchant.secret_key.clone());
        Self {
            merchant,
            catalog,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            signer,
            store,
            metrics,
        }
    }

    /// Price the product server-side, sign the payload and persist a pending
    /// order. The payload is only returned once the order is stored.
    pub async fn create(
        &self,
        name: &str,
        email: &str,
        product: Product,
    ) -> Result<RedirectPayload, PaymentRequestError> {
        let now = Utc::now();
        let entry = self.catalog.entry(product);
        let name = name.trim().to_string();
        let email = email.trim().to_string();

        let mut payload = RedirectPayload {
            merchant_account: self.merchant.account.clone(),
            merchant_auth_type: MERCHANT_AUTH_TYPE.to_string(),
            merchant_domain_name: self.merchant.domain_name.clone(),
            order_reference: generate_order_reference(now),
            order_date: now.timestamp(),
            amount: entry.price,
            currency: self.merchant.currency.clone(),
            product_name: vec![entry.name.clone()],
            product_count: vec![1],
            product_price: vec![entry.price],
            client_first_name: name.clone(),
            client_email: email.clone(),
            language: self.merchant.language.clone(),
            return_url: format!("{}{}", self.public_base_url, RETURN_PATH),
            service_url: format!("{}{}", self.public_base_url, SERVICE_PATH),
            merchant_signature: String::new(),
        };
        payload.merchant_signature = self.signer.sign(&payload.signed_fields())?;

        let order = Order::new_pending(
            payload.order_reference.clone(),
            name,
            email,
            product,
            entry.name.clone(),
            entry.price,
            payload.currency.clone(),
            now,
        );
        self.store.insert_new(order).await?;
        self.metrics.record_order_created(product.as_str());

        tracing::info!(
            order_reference = %payload.order_reference,
            product = %product,
            amount = %entry.price,
            "Payment request created"
        );

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use crate::services::signature::CallbackSignatureScheme;
    use crate::services::store::MemoryPersistence;
    use secrecy::Secret;
    use std::sync::Arc;

    fn merchant() -> MerchantConfig {
        MerchantConfig {
            account: "test_merch_n1".to_string(),
            domain_name: "shop.example.com".to_string(),
            secret_key: Secret::new("secret".to_string()),
            gateway_url: "https://secure.wayforpay.com/pay".to_string(),
            currency: "UAH".to_string(),
            language: "UA".to_string(),
            callback_signature: CallbackSignatureScheme::default(),
        }
    }

    async fn builder(persistence: Arc<MemoryPersistence>) -> (PaymentRequestBuilder, OrderStore) {
        let store = OrderStore::open(persistence).await.unwrap();
        let builder = PaymentRequestBuilder::new(
            merchant(),
            Catalog::with_defaults(),
            "https://shop.example.com/".to_string(),
            store.clone(),
            PaymentMetrics::new(),
        );
        (builder, store)
    }

    #[test]
    fn test_reference_format() {
        let now = Utc::now();
        let reference = generate_order_reference(now);
        let parts: Vec<&str> = reference.split('-').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORDER");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 5);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[tokio::test]
    async fn test_create_prices_signs_and_stores() {
        let (builder, store) = builder(Arc::new(MemoryPersistence::new())).await;

        let payload = builder
            .create(" Olena ", "olena@example.com", Product::Solo)
            .await
            .unwrap();

        assert_eq!(payload.amount, Decimal::ONE);
        assert_eq!(payload.product_name, vec!["Plan: Self-study".to_string()]);
        assert_eq!(payload.client_first_name, "Olena");
        assert_eq!(payload.return_url, "https://shop.example.com/payment-return");
        assert_eq!(payload.service_url, "https://shop.example.com/server-callback");

        let signer = SignatureEngine::new(Secret::new("secret".to_string()));
        assert!(signer
            .verify(&payload.signed_fields(), &payload.merchant_signature)
            .unwrap());

        let order = store.get(&payload.order_reference).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.amount, Decimal::ONE);
        assert_eq!(order.currency, "UAH");
    }

    #[tokio::test]
    async fn test_signed_message_field_order() {
        let (builder, _) = builder(Arc::new(MemoryPersistence::new())).await;
        let payload = builder
            .create("Olena", "olena@example.com", Product::Support)
            .await
            .unwrap();

        let expected = format!(
            "test_merch_n1;shop.example.com;{};{};777;UAH;Plan: With support;1;777",
            payload.order_reference, payload.order_date
        );
        assert_eq!(SignatureEngine::message(&payload.signed_fields()), expected);
    }

    #[tokio::test]
    async fn test_store_failure_returns_no_payload() {
        let persistence = Arc::new(MemoryPersistence::new());
        let (builder, store) = builder(persistence.clone()).await;
        persistence.fail_writes(true);

        let result = builder
            .create("Olena", "olena@example.com", Product::Solo)
            .await;

        assert!(matches!(result, Err(PaymentRequestError::Storage(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_form_fields_order() {
        let (builder, _) = builder(Arc::new(MemoryPersistence::new())).await;
        let payload = builder
            .create("Olena", "olena@example.com", Product::Solo)
            .await
            .unwrap();

        let names: Vec<String> = payload.form_fields().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names.first().map(String::as_str), Some("merchantAccount"));
        assert_eq!(names.last().map(String::as_str), Some("merchantSignature"));
        assert!(names.contains(&"productName[]".to_string()));
    }
}
