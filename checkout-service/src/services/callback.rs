//! Server-to-server payment notifications from the gateway.
//!
//! The gateway retries until it receives a signed `accept`, so every request
//! is acknowledged with HTTP 200. Only a verified notification can move an
//! order, and only out of `pending`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::models::{OrderStatus, OrderTransition, TransitionOutcome};
use crate::services::metrics::PaymentMetrics;
use crate::services::notifications::{NotificationDispatcher, PaymentNotification};
use crate::services::signature::{
    CallbackSignatureScheme, SignatureEngine, SignatureError, SignatureField,
};
use crate::services::store::{OrderStore, StorageError};

pub const ACK_STATUS: &str = "accept";
pub const UNKNOWN_REFERENCE: &str = "unknown";

const REQUIRED_FIELDS: [&str; 4] = [
    "orderReference",
    "transactionStatus",
    "processingDate",
    "merchantSignature",
];

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("malformed notification: {0}")]
    Malformed(String),

    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error(transparent)]
    Signing(#[from] SignatureError),

    #[error("order store failure: {0}")]
    Storage(#[from] StorageError),
}

impl CallbackError {
    /// Metrics label.
    pub fn reason(&self) -> &'static str {
        match self {
            CallbackError::Malformed(_) => "malformed",
            CallbackError::MissingFields(_) => "missing_fields",
            CallbackError::SignatureMismatch => "signature",
            CallbackError::Signing(_) => "signing",
            CallbackError::Storage(_) => "storage",
        }
    }
}

/// A decoded notification. Scalar values are kept in canonical string form;
/// the received object is retained for the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayNotification {
    fields: BTreeMap<String, String>,
    raw: Map<String, Value>,
}

impl GatewayNotification {
    pub fn from_object(raw: Map<String, Value>) -> Self {
        let fields = raw
            .iter()
            .map(|(k, v)| (k.clone(), SignatureField::from_json(v).as_str().to_string()))
            .collect();
        Self { fields, raw }
    }

    /// Non-empty value of a field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn order_reference(&self) -> Option<&str> {
        self.get("orderReference")
    }

    pub fn transaction_status(&self) -> Option<&str> {
        self.get("transactionStatus")
    }

    pub fn signature(&self) -> Option<&str> {
        self.get("merchantSignature")
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|name| self.get(name).is_none())
            .collect()
    }

    pub fn payload(&self) -> Value {
        Value::Object(self.raw.clone())
    }
}

/// Decode a callback body.
///
/// JSON content types are parsed as a JSON object. Anything else is treated
/// as form data; a form with a single key that is itself a JSON object (a JSON
/// body posted with a form content type) is parsed as JSON.
pub fn decode_notification(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<GatewayNotification, CallbackError> {
    let is_json = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("json"))
        .unwrap_or(false);

    if is_json {
        return parse_json_object(body);
    }

    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
        .map_err(|e| CallbackError::Malformed(format!("invalid form body: {}", e)))?;

    if let [(key, _)] = pairs.as_slice() {
        if let Ok(Value::Object(_)) = serde_json::from_str::<Value>(key) {
            return parse_json_object(body).or_else(|_| parse_json_object(key.as_bytes()));
        }
    }

    let raw = pairs
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect::<Map<String, Value>>();
    Ok(GatewayNotification::from_object(raw))
}

fn parse_json_object(body: &[u8]) -> Result<GatewayNotification, CallbackError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(raw)) => Ok(GatewayNotification::from_object(raw)),
        Ok(_) => Err(CallbackError::Malformed(
            "notification is not a JSON object".to_string(),
        )),
        Err(e) => Err(CallbackError::Malformed(format!("invalid JSON: {}", e))),
    }
}

/// Gateway transaction statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Approved,
    Declined,
    Expired,
    Voided,
    InProcessing,
    WaitingAuthComplete,
    Pending,
    Refunded,
    RefundInProcessing,
    Other(String),
}

impl TransactionStatus {
    pub fn from_gateway(value: &str) -> Self {
        match value.trim() {
            "Approved" => TransactionStatus::Approved,
            "Declined" => TransactionStatus::Declined,
            "Expired" => TransactionStatus::Expired,
            "Voided" => TransactionStatus::Voided,
            "InProcessing" => TransactionStatus::InProcessing,
            "WaitingAuthComplete" => TransactionStatus::WaitingAuthComplete,
            "Pending" => TransactionStatus::Pending,
            "Refunded" => TransactionStatus::Refunded,
            "RefundInProcessing" => TransactionStatus::RefundInProcessing,
            other => TransactionStatus::Other(other.to_string()),
        }
    }

    /// The order transition this status requests, if any.
    pub fn transition(&self) -> Option<OrderTransition> {
        match self {
            TransactionStatus::Approved => Some(OrderTransition::Paid),
            TransactionStatus::Declined => Some(OrderTransition::Declined),
            TransactionStatus::Expired | TransactionStatus::Voided => Some(OrderTransition::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Other(s) => f.write_str(s),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Signed response body the gateway expects.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallbackAck {
    pub order_reference: String,
    pub status: String,
    pub time: i64,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Paid,
    Declined,
    Failed,
    /// Status that does not move the order.
    Ignored(String),
    /// Replay for a paid order, or a decline/failure for a settled one.
    Unchanged(OrderStatus),
    OrderNotFound,
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct CallbackResult {
    pub ack: CallbackAck,
    pub outcome: CallbackOutcome,
}

#[derive(Clone)]
pub struct CallbackProcessor {
    signer: SignatureEngine,
    scheme: CallbackSignatureScheme,
    store: OrderStore,
    dispatcher: NotificationDispatcher,
    metrics: PaymentMetrics,
}

impl CallbackProcessor {
    pub fn new(
        signer: SignatureEngine,
        scheme: CallbackSignatureScheme,
        store: OrderStore,
        dispatcher: NotificationDispatcher,
        metrics: PaymentMetrics,
    ) -> Self {
        Self {
            signer,
            scheme,
            store,
            dispatcher,
            metrics,
        }
    }

    /// Handle one delivery. Never fails: errors become a rejected outcome and
    /// an `error` field on the acknowledgement.
    pub async fn process(&self, content_type: Option<&str>, body: &[u8]) -> CallbackResult {
        let decoded = decode_notification(content_type, body);
        let reference = decoded
            .as_ref()
            .ok()
            .and_then(|n| n.order_reference())
            .unwrap_or(UNKNOWN_REFERENCE)
            .to_string();

        let result = match decoded {
            Ok(notification) => self.apply(&notification).await,
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.record_callback_rejected(e.reason());
                tracing::warn!(
                    order_reference = %reference,
                    reason = e.reason(),
                    error = %e,
                    "Callback rejected"
                );
                CallbackOutcome::Rejected(e.to_string())
            }
        };

        let error = match &outcome {
            CallbackOutcome::Rejected(message) => Some(message.clone()),
            _ => None,
        };

        CallbackResult {
            ack: self.acknowledge(&reference, Utc::now(), error),
            outcome,
        }
    }

    async fn apply(&self, notification: &GatewayNotification) -> Result<CallbackOutcome, CallbackError> {
        let missing = notification.missing_fields();
        if !missing.is_empty() {
            return Err(CallbackError::MissingFields(missing));
        }

        let reference = notification.order_reference().unwrap_or_default();
        let signature = notification.signature().unwrap_or_default();

        let fields = self.scheme.signed_fields(|name| notification.get(name));
        if !self.signer.verify(&fields, signature)? {
            return Err(CallbackError::SignatureMismatch);
        }

        let raw_status = notification.transaction_status().unwrap_or_default();
        let status = TransactionStatus::from_gateway(raw_status);
        let Some(transition) = status.transition() else {
            tracing::info!(
                order_reference = %reference,
                transaction_status = %status,
                "Transaction status does not change the order"
            );
            return Ok(CallbackOutcome::Ignored(status.to_string()));
        };

        let payload = notification.payload();
        let now = Utc::now();
        let updated = self
            .store
            .update(reference, move |order| {
                let outcome = order.transition(transition, payload, now);
                let notification = match outcome {
                    TransitionOutcome::Applied(OrderStatus::Paid) => {
                        Some(PaymentNotification::from(&*order))
                    }
                    _ => None,
                };
                (outcome, notification)
            })
            .await?;

        let Some((outcome, notification)) = updated else {
            tracing::warn!(order_reference = %reference, "Callback for unknown order");
            return Ok(CallbackOutcome::OrderNotFound);
        };

        match outcome {
            TransitionOutcome::Unchanged(current) => {
                tracing::info!(
                    order_reference = %reference,
                    current_status = %current,
                    transaction_status = %status,
                    "Order already settled, ignoring callback"
                );
                Ok(CallbackOutcome::Unchanged(current))
            }
            TransitionOutcome::Applied(_) => match transition {
                OrderTransition::Paid => {
                    self.metrics.record_payment_succeeded();
                    tracing::info!(order_reference = %reference, "Payment approved");
                    if let Some(notification) = notification {
                        self.dispatcher.dispatch(notification);
                    }
                    Ok(CallbackOutcome::Paid)
                }
                OrderTransition::Declined => {
                    self.metrics.record_payment_failed("declined");
                    tracing::info!(order_reference = %reference, "Payment declined");
                    Ok(CallbackOutcome::Declined)
                }
                OrderTransition::Failed => {
                    self.metrics.record_payment_failed("failed");
                    tracing::info!(
                        order_reference = %reference,
                        transaction_status = %status,
                        "Payment failed"
                    );
                    Ok(CallbackOutcome::Failed)
                }
            },
        }
    }

    /// Signed acknowledgement over `orderReference;accept;time`.
    pub fn acknowledge(&self, reference: &str, at: DateTime<Utc>, error: Option<String>) -> CallbackAck {
        let time = at.timestamp();
        let signature = self
            .signer
            .sign(&[reference.into(), ACK_STATUS.into(), time.into()])
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to sign callback acknowledgement");
                String::new()
            });

        CallbackAck {
            order_reference: reference.to_string(),
            status: ACK_STATUS.to_string(),
            time,
            signature,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Order, Product};
    use crate::services::notifications::{Notifier, RecordingNotifier};
    use crate::services::store::MemoryPersistence;
    use rust_decimal::Decimal;
    use secrecy::Secret;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const SECRET: &str = "merchant-secret";

    struct Fixture {
        processor: CallbackProcessor,
        store: OrderStore,
        dispatcher: NotificationDispatcher,
        notifier: Arc<RecordingNotifier>,
        metrics: PaymentMetrics,
    }

    async fn fixture(scheme: CallbackSignatureScheme) -> Fixture {
        let store = OrderStore::open(Arc::new(MemoryPersistence::new()))
            .await
            .unwrap();
        store
            .put(Order::new_pending(
                "ORDER-1".to_string(),
                "Olena".to_string(),
                "olena@example.com".to_string(),
                Product::Solo,
                "Plan: Self-study".to_string(),
                Decimal::ONE,
                "UAH".to_string(),
                Utc::now(),
            ))
            .await
            .unwrap();

        let metrics = PaymentMetrics::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher = NotificationDispatcher::new(
            vec![notifier.clone() as Arc<dyn Notifier>],
            Duration::from_secs(1),
            metrics.clone(),
        );
        let processor = CallbackProcessor::new(
            engine(),
            scheme,
            store.clone(),
            dispatcher.clone(),
            metrics.clone(),
        );

        Fixture {
            processor,
            store,
            dispatcher,
            notifier,
            metrics,
        }
    }

    fn engine() -> SignatureEngine {
        SignatureEngine::new(Secret::new(SECRET.to_string()))
    }

    fn signed(reference: &str, status: &str) -> Value {
        let mut body = json!({
            "merchantAccount": "test_merch_n1",
            "orderReference": reference,
            "amount": 1,
            "currency": "UAH",
            "authCode": "541963",
            "cardPan": "41****8217",
            "transactionStatus": status,
            "reasonCode": 1100,
            "processingDate": 1700000000,
        });
        let notification = GatewayNotification::from_object(body.as_object().unwrap().clone());
        let fields = CallbackSignatureScheme::WayForPayV1.signed_fields(|n| notification.get(n));
        body["merchantSignature"] = json!(engine().sign(&fields).unwrap());
        body
    }

    async fn send(f: &Fixture, body: &Value) -> CallbackResult {
        f.processor
            .process(Some("application/json"), body.to_string().as_bytes())
            .await
    }

    #[test]
    fn test_decode_form() {
        let n = decode_notification(
            Some("application/x-www-form-urlencoded"),
            b"orderReference=ORDER-1&transactionStatus=Approved",
        )
        .unwrap();
        assert_eq!(n.order_reference(), Some("ORDER-1"));
        assert_eq!(n.transaction_status(), Some("Approved"));
    }

    #[test]
    fn test_decode_json_posted_as_form() {
        let body = json!({"orderReference": "ORDER-1", "amount": 1.0}).to_string();
        let n = decode_notification(Some("application/x-www-form-urlencoded"), body.as_bytes()).unwrap();
        assert_eq!(n.order_reference(), Some("ORDER-1"));
        assert_eq!(n.get("amount"), Some("1"));
    }

    #[test]
    fn test_decode_single_plain_key() {
        let n = decode_notification(None, b"orderReference=ORDER-1").unwrap();
        assert_eq!(n.order_reference(), Some("ORDER-1"));
    }

    #[test]
    fn test_decode_rejects_non_object_json() {
        assert!(decode_notification(Some("application/json"), b"[1,2]").is_err());
        assert!(decode_notification(Some("application/json"), b"{not json").is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            TransactionStatus::from_gateway("Approved").transition(),
            Some(OrderTransition::Paid)
        );
        assert_eq!(
            TransactionStatus::from_gateway("Declined").transition(),
            Some(OrderTransition::Declined)
        );
        assert_eq!(
            TransactionStatus::from_gateway("Expired").transition(),
            Some(OrderTransition::Failed)
        );
        assert_eq!(
            TransactionStatus::from_gateway("Voided").transition(),
            Some(OrderTransition::Failed)
        );
        assert_eq!(TransactionStatus::from_gateway("InProcessing").transition(), None);
        assert_eq!(TransactionStatus::from_gateway("Refunded").transition(), None);
        assert_eq!(TransactionStatus::from_gateway("Mystery").transition(), None);
        assert_eq!(TransactionStatus::from_gateway("Mystery").to_string(), "Mystery");
    }

    #[tokio::test]
    async fn test_approved_pays_once_and_notifies_once() {
        let f = fixture(CallbackSignatureScheme::WayForPayV1).await;
        let body = signed("ORDER-1", "Approved");

        let first = send(&f, &body).await;
        assert_eq!(first.outcome, CallbackOutcome::Paid);
        assert_eq!(first.ack.order_reference, "ORDER-1");
        assert_eq!(first.ack.status, "accept");
        assert!(first.ack.error.is_none());

        let second = send(&f, &body).await;
        assert_eq!(second.outcome, CallbackOutcome::Unchanged(OrderStatus::Paid));

        f.dispatcher.drain().await;
        assert_eq!(f.notifier.customer_count(), 1);
        assert_eq!(f.notifier.admin_count(), 1);

        let order = f.store.get("ORDER-1").await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(order.paid_at.is_some());
        assert_eq!(order.gateway_payload, Some(body));
        assert_eq!(f.metrics.snapshot().successful_payments, 1);
    }

    #[tokio::test]
    async fn test_ack_signature_verifies() {
        let f = fixture(CallbackSignatureScheme::WayForPayV1).await;
        let result = send(&f, &signed("ORDER-1", "Approved")).await;

        let fields: Vec<SignatureField> = vec![
            result.ack.order_reference.as_str().into(),
            "accept".into(),
            result.ack.time.into(),
        ];
        assert!(engine().verify(&fields, &result.ack.signature).unwrap());
    }

    #[tokio::test]
    async fn test_bad_signature_changes_nothing() {
        let f = fixture(CallbackSignatureScheme::WayForPayV1).await;
        let mut body = signed("ORDER-1", "Approved");
        body["merchantSignature"] = json!("0".repeat(32));

        let result = send(&f, &body).await;
        assert!(matches!(result.outcome, CallbackOutcome::Rejected(_)));
        assert_eq!(result.ack.order_reference, "ORDER-1");
        assert!(result.ack.error.is_some());

        let order = f.store.get("ORDER-1").await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(f.metrics.snapshot().rejected_callbacks, 1);
    }

    #[tokio::test]
    async fn test_tampered_amount_is_rejected() {
        let f = fixture(CallbackSignatureScheme::WayForPayV1).await;
        let mut body = signed("ORDER-1", "Approved");
        body["amount"] = json!(0.01);

        let result = send(&f, &body).await;
        assert!(matches!(result.outcome, CallbackOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn test_configured_scheme_only() {
        let f = fixture(CallbackSignatureScheme::ReferenceStatusDate).await;

        let result = send(&f, &signed("ORDER-1", "Approved")).await;
        assert!(matches!(result.outcome, CallbackOutcome::Rejected(_)));

        let mut body = signed("ORDER-1", "Approved");
        body["merchantSignature"] = json!(engine()
            .sign(&["ORDER-1".into(), "Approved".into(), "1700000000".into()])
            .unwrap());
        let result = send(&f, &body).await;
        assert_eq!(result.outcome, CallbackOutcome::Paid);
    }

    #[tokio::test]
    async fn test_missing_fields() {
        let f = fixture(CallbackSignatureScheme::WayForPayV1).await;
        let result = send(&f, &json!({"transactionStatus": "Approved"})).await;

        assert_eq!(result.ack.order_reference, UNKNOWN_REFERENCE);
        let error = result.ack.error.unwrap();
        assert!(error.contains("orderReference"));
        assert!(error.contains("merchantSignature"));
    }

    #[tokio::test]
    async fn test_garbage_body_is_acknowledged() {
        let f = fixture(CallbackSignatureScheme::WayForPayV1).await;
        let result = f.processor.process(Some("application/json"), b"\x00\x01").await;

        assert_eq!(result.ack.order_reference, UNKNOWN_REFERENCE);
        assert_eq!(result.ack.status, "accept");
        assert!(matches!(result.outcome, CallbackOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let f = fixture(CallbackSignatureScheme::WayForPayV1).await;
        let result = send(&f, &signed("ORDER-404", "Approved")).await;

        assert_eq!(result.outcome, CallbackOutcome::OrderNotFound);
        assert_eq!(result.ack.order_reference, "ORDER-404");
        assert!(result.ack.error.is_none());
    }

    #[tokio::test]
    async fn test_declined_then_approved_is_paid() {
        let f = fixture(CallbackSignatureScheme::WayForPayV1).await;

        let result = send(&f, &signed("ORDER-1", "Declined")).await;
        assert_eq!(result.outcome, CallbackOutcome::Declined);

        let result = send(&f, &signed("ORDER-1", "Approved")).await;
        assert_eq!(result.outcome, CallbackOutcome::Paid);

        let order = f.store.get("ORDER-1").await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(order.paid_at.is_some());
        assert!(order.declined_at.is_some());

        f.dispatcher.drain().await;
        assert_eq!(f.notifier.customer_count(), 1);
        assert_eq!(f.metrics.snapshot().failed_payments, 1);
        assert_eq!(f.metrics.snapshot().successful_payments, 1);
    }

    #[tokio::test]
    async fn test_decline_after_paid_is_ignored() {
        let f = fixture(CallbackSignatureScheme::WayForPayV1).await;

        send(&f, &signed("ORDER-1", "Approved")).await;
        let result = send(&f, &signed("ORDER-1", "Declined")).await;
        assert_eq!(result.outcome, CallbackOutcome::Unchanged(OrderStatus::Paid));

        let order = f.store.get("ORDER-1").await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(order.declined_at.is_none());
        assert_eq!(f.metrics.snapshot().failed_payments, 0);
    }

    #[tokio::test]
    async fn test_in_processing_is_ignored() {
        let f = fixture(CallbackSignatureScheme::WayForPayV1).await;
        let result = send(&f, &signed("ORDER-1", "InProcessing")).await;

        assert_eq!(
            result.outcome,
            CallbackOutcome::Ignored("InProcessing".to_string())
        );
        let order = f.store.get("ORDER-1").await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_concurrent_approvals_pay_once() {
        let f = fixture(CallbackSignatureScheme::WayForPayV1).await;
        let body = signed("ORDER-1", "Approved").to_string();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let processor = f.processor.clone();
            let body = body.clone();
            handles.push(tokio::spawn(async move {
                processor
                    .process(Some("application/json"), body.as_bytes())
                    .await
                    .outcome
            }));
        }

        let mut paid = 0;
        for handle in handles {
            if handle.await.unwrap() == CallbackOutcome::Paid {
                paid += 1;
            }
        }

        f.dispatcher.drain().await;
        assert_eq!(paid, 1);
        assert_eq!(f.notifier.customer_count(), 1);
    }
}
