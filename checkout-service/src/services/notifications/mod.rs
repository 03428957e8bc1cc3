//! Post-payment notifications.
//!
//! Delivery is best effort: the order transition is the source of truth and a
//! failed email or chat message never rolls it back.

pub mod dispatcher;
pub mod email;
pub mod telegram;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::models::Order;

pub use dispatcher::NotificationDispatcher;
pub use email::SmtpNotifier;
pub use telegram::TelegramNotifier;

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Notifier not enabled: {0}")]
    NotEnabled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Send error: {0}")]
    SendFailed(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// What a notifier needs to know about a freshly paid order.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentNotification {
    pub order_reference: String,
    pub customer_name: String,
    pub customer_email: String,
    pub product_description: String,
    pub amount: Decimal,
    pub currency: String,
    pub paid_at: DateTime<Utc>,
}

impl From<&Order> for PaymentNotification {
    fn from(order: &Order) -> Self {
        Self {
            order_reference: order.reference.clone(),
            customer_name: order.customer_name.clone(),
            customer_email: order.customer_email.clone(),
            product_description: order.product_description.clone(),
            amount: order.amount,
            currency: order.currency.clone(),
            paid_at: order.paid_at.unwrap_or_else(Utc::now),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name used in logs and metrics labels.
    fn channel(&self) -> &'static str;

    async fn notify_customer(&self, _notification: &PaymentNotification) -> Result<(), NotifierError> {
        Ok(())
    }

    async fn notify_admin(&self, _notification: &PaymentNotification) -> Result<(), NotifierError> {
        Ok(())
    }
}

/// In-memory notifier that records deliveries. Used in tests and local runs.
#[derive(Default)]
pub struct RecordingNotifier {
    customer_count: AtomicU64,
    admin_count: AtomicU64,
    delivered: Mutex<Vec<PaymentNotification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every delivery fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn customer_count(&self) -> u64 {
        self.customer_count.load(Ordering::SeqCst)
    }

    pub fn admin_count(&self) -> u64 {
        self.admin_count.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<PaymentNotification> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn channel(&self) -> &'static str {
        "recording"
    }

    async fn notify_customer(&self, notification: &PaymentNotification) -> Result<(), NotifierError> {
        self.customer_count.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(NotifierError::SendFailed("recording notifier set to fail".to_string()));
        }
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(notification.clone());
        }
        tracing::info!(
            order_reference = %notification.order_reference,
            to = %notification.customer_email,
            "[MOCK] Customer confirmation would be sent"
        );
        Ok(())
    }

    async fn notify_admin(&self, notification: &PaymentNotification) -> Result<(), NotifierError> {
        self.admin_count.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(NotifierError::SendFailed("recording notifier set to fail".to_string()));
        }
        tracing::info!(
            order_reference = %notification.order_reference,
            "[MOCK] Admin alert would be sent"
        );
        Ok(())
    }
}

/// Plain-text admin summary shared by the email and chat channels.
pub fn admin_message(n: &PaymentNotification) -> String {
    format!(
        "New payment\nOrder: {}\nCustomer: {} <{}>\nProduct: {}\nAmount: {} {}\nPaid at: {}",
        n.order_reference,
        n.customer_name,
        n.customer_email,
        n.product_description,
        n.amount.normalize(),
        n.currency,
        n.paid_at.to_rfc3339()
    )
}
