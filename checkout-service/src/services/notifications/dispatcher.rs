use super::{Notifier, NotifierError, PaymentNotification};
use crate::services::metrics::PaymentMetrics;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;

/// Fans a paid order out to every configured notifier in the background.
///
/// Deliveries are tracked so shutdown can wait for them instead of dropping
/// emails mid-flight.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifiers: Arc<Vec<Arc<dyn Notifier>>>,
    tracker: TaskTracker,
    /// Set once by `shutdown`; guards the tracker's close/reopen.
    shut_down: Arc<Mutex<bool>>,
    timeout: Duration,
    metrics: PaymentMetrics,
}

impl NotificationDispatcher {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>, timeout: Duration, metrics: PaymentMetrics) -> Self {
        Self {
            notifiers: Arc::new(notifiers),
            tracker: TaskTracker::new(),
            shut_down: Arc::new(Mutex::new(false)),
            timeout,
            metrics,
        }
    }

    pub fn channels(&self) -> Vec<&'static str> {
        self.notifiers.iter().map(|n| n.channel()).collect()
    }

    /// Schedule deliveries and return immediately.
    pub fn dispatch(&self, notification: PaymentNotification) {
        if self.notifiers.is_empty() {
            tracing::debug!(
                order_reference = %notification.order_reference,
                "No notifiers configured, skipping"
            );
            return;
        }

        let notifiers = self.notifiers.clone();
        let timeout = self.timeout;
        let metrics = self.metrics.clone();

        self.tracker.spawn(async move {
            for notifier in notifiers.iter() {
                let channel = notifier.channel();

                let result = with_timeout(timeout, notifier.notify_customer(&notification)).await;
                report(&metrics, channel, "customer", &notification, result);

                let result = with_timeout(timeout, notifier.notify_admin(&notification)).await;
                report(&metrics, channel, "admin", &notification, result);
            }
        });
    }

    /// Wait for every delivery scheduled so far. The dispatcher stays usable
    /// unless `shutdown` has been called meanwhile.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;

        let shut_down = self.shut_down.lock().await;
        if !*shut_down {
            self.tracker.reopen();
        }
    }

    pub async fn is_shut_down(&self) -> bool {
        *self.shut_down.lock().await
    }

    /// Stop accepting work and wait for in-flight deliveries, at most `grace`.
    /// Returns `false` if deliveries were still running when the grace ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        {
            let mut shut_down = self.shut_down.lock().await;
            *shut_down = true;
            self.tracker.close();
        }
        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!(pending, "Waiting for notification deliveries");
        }

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    pending = self.tracker.len(),
                    grace_secs = grace.as_secs(),
                    "Notification deliveries still running at shutdown"
                );
                false
            }
        }
    }
}

async fn with_timeout<F>(timeout: Duration, fut: F) -> Result<(), NotifierError>
where
    F: Future<Output = Result<(), NotifierError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or(Err(NotifierError::Timeout(timeout)))
}

fn report(
    metrics: &PaymentMetrics,
    channel: &'static str,
    audience: &'static str,
    notification: &PaymentNotification,
    result: Result<(), NotifierError>,
) {
    match result {
        Ok(()) => {}
        Err(NotifierError::NotEnabled(reason)) => {
            tracing::debug!(channel, audience, reason = %reason, "Notification skipped");
        }
        Err(e) => {
            metrics.record_notification_failure(channel);
            tracing::error!(
                channel,
                audience,
                order_reference = %notification.order_reference,
                error = %e,
                "Notification delivery failed"
            );
        }
    }
}
