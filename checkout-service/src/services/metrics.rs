//! Metrics collection for checkout-service.
//!
//! Business counters live in [`PaymentMetrics`], created per application and
//! shared through state. Every increment is mirrored to the `metrics` facade so
//! the Prometheus recorder installed by the binary exports it on `/metrics`.

use chrono::{DateTime, Utc};
use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the process-wide Prometheus recorder. Calling it twice is a no-op.
pub fn init_metrics() -> anyhow::Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

#[derive(Debug)]
struct Counters {
    total_orders: AtomicU64,
    successful_payments: AtomicU64,
    failed_payments: AtomicU64,
    rejected_callbacks: AtomicU64,
    notification_failures: AtomicU64,
    started: Instant,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PaymentMetrics {
    inner: Arc<Counters>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_orders: u64,
    pub successful_payments: u64,
    pub failed_payments: u64,
    pub rejected_callbacks: u64,
    pub notification_failures: u64,
    pub uptime_seconds: u64,
    pub started_at: DateTime<Utc>,
}

impl Default for PaymentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PaymentMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Counters {
                total_orders: AtomicU64::new(0),
                successful_payments: AtomicU64::new(0),
                failed_payments: AtomicU64::new(0),
                rejected_callbacks: AtomicU64::new(0),
                notification_failures: AtomicU64::new(0),
                started: Instant::now(),
                started_at: Utc::now(),
            }),
        }
    }

    pub fn record_order_created(&self, product: &'static str) {
        self.inner.total_orders.fetch_add(1, Ordering::Relaxed);
        counter!("checkout_orders_created_total", "product" => product).increment(1);
    }

    pub fn record_payment_succeeded(&self) {
        self.inner.successful_payments.fetch_add(1, Ordering::Relaxed);
        counter!("checkout_payments_total", "outcome" => "paid").increment(1);
    }

    pub fn record_payment_failed(&self, outcome: &'static str) {
        self.inner.failed_payments.fetch_add(1, Ordering::Relaxed);
        counter!("checkout_payments_total", "outcome" => outcome).increment(1);
    }

    pub fn record_callback_rejected(&self, reason: &'static str) {
        self.inner.rejected_callbacks.fetch_add(1, Ordering::Relaxed);
        counter!("checkout_callbacks_rejected_total", "reason" => reason).increment(1);
    }

    pub fn record_notification_failure(&self, channel: &'static str) {
        self.inner.notification_failures.fetch_add(1, Ordering::Relaxed);
        counter!("checkout_notification_failures_total", "channel" => channel).increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_orders: self.inner.total_orders.load(Ordering::Relaxed),
            successful_payments: self.inner.successful_payments.load(Ordering::Relaxed),
            failed_payments: self.inner.failed_payments.load(Ordering::Relaxed),
            rejected_callbacks: self.inner.rejected_callbacks.load(Ordering::Relaxed),
            notification_failures: self.inner.notification_failures.load(Ordering::Relaxed),
            uptime_seconds: self.inner.started.elapsed().as_secs(),
            started_at: self.inner.started_at,
        }
    }
}
