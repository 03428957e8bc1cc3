use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Product;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Declined,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Declined => "declined",
            OrderStatus::Failed => "failed",
        }
    }

    /// Vocabulary exposed to polling clients: `paid` is reported as `accept`.
    pub fn public_status(&self) -> &'static str {
        match self {
            OrderStatus::Paid => "accept",
            other => other.as_str(),
        }
    }

    /// `paid` is terminal. `declined` and `failed` still accept a later approval,
    /// since the customer may retry with another card on the same hosted page.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change requested by a verified gateway notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderTransition {
    Paid,
    Declined,
    Failed,
}

impl OrderTransition {
    pub fn target(&self) -> OrderStatus {
        match self {
            OrderTransition::Paid => OrderStatus::Paid,
            OrderTransition::Declined => OrderStatus::Declined,
            OrderTransition::Failed => OrderStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied(OrderStatus),
    /// Nothing changed: the order is paid, or a decline/failure arrived after
    /// the order had already settled.
    Unchanged(OrderStatus),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub reference: String,
    pub customer_name: String,
    pub customer_email: String,
    pub product: Product,
    pub product_description: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declined_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    /// Verified notification that moved the order out of `pending`, kept for audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_payload: Option<serde_json::Value>,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        reference: String,
        customer_name: String,
        customer_email: String,
        product: Product,
        product_description: String,
        amount: Decimal,
        currency: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            reference,
            customer_name,
            customer_email,
            product,
            product_description,
            amount,
            currency,
            status: OrderStatus::Pending,
            created_at,
            paid_at: None,
            declined_at: None,
            failed_at: None,
            gateway_payload: None,
        }
    }

    /// Apply a transition. Approval moves any order that is not yet paid.
    /// Decline and failure only move `pending` orders. Earlier timestamps are
    /// kept for audit.
    pub fn transition(
        &mut self,
        transition: OrderTransition,
        payload: serde_json::Value,
        at: DateTime<Utc>,
    ) -> TransitionOutcome {
        let allowed = match transition {
            OrderTransition::Paid => !self.status.is_terminal(),
            OrderTransition::Declined | OrderTransition::Failed => {
                self.status == OrderStatus::Pending
            }
        };
        if !allowed {
            return TransitionOutcome::Unchanged(self.status);
        }

        match transition {
            OrderTransition::Paid => self.paid_at = Some(at),
            OrderTransition::Declined => self.declined_at = Some(at),
            OrderTransition::Failed => self.failed_at = Some(at),
        }
        self.status = transition.target();
        self.gateway_payload = Some(payload);

        TransitionOutcome::Applied(self.status)
    }
}
