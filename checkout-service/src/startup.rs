//! Application startup and lifecycle management.

use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

use crate::config::CheckoutConfig;
use crate::handlers;
use crate::services::notifications::{SmtpNotifier, TelegramNotifier};
use crate::services::{
    CallbackProcessor, JsonFilePersistence, NotificationDispatcher, Notifier, OrderStore,
    PaymentMetrics, PaymentRequestBuilder, SignatureEngine,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub gateway_url: String,
    pub store: OrderStore,
    pub payments: PaymentRequestBuilder,
    pub callbacks: CallbackProcessor,
    pub dispatcher: NotificationDispatcher,
    pub metrics: PaymentMetrics,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    config: CheckoutConfig,
}

/// Notifiers enabled by configuration.
pub fn notifiers_from_config(config: &CheckoutConfig) -> Result<Vec<Arc<dyn Notifier>>, AppError> {
    let timeout = config.notifications.timeout();
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();

    if config.smtp.enabled {
        let smtp = SmtpNotifier::new(config.smtp.clone(), timeout)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("SMTP notifier: {}", e)))?;
        notifiers.push(Arc::new(smtp));
    } else {
        tracing::warn!("SMTP disabled, confirmation emails will not be sent");
    }

    if config.telegram.enabled {
        let telegram = TelegramNotifier::new(config.telegram.clone(), timeout)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Telegram notifier: {}", e)))?;
        notifiers.push(Arc::new(telegram));
    }

    Ok(notifiers)
}

impl Application {
    /// Build the application with notifiers taken from configuration.
    pub async fn build(config: CheckoutConfig) -> Result<Self, AppError> {
        let notifiers = notifiers_from_config(&config)?;
        Self::build_with_notifiers(config, notifiers).await
    }

    /// Load the order store, bind the listener and assemble state.
    pub async fn build_with_notifiers(
        config: CheckoutConfig,
        notifiers: Vec<Arc<dyn Notifier>>,
    ) -> Result<Self, AppError> {
        let persistence = Arc::new(JsonFilePersistence::new(config.storage.orders_path.clone()));
        let store = OrderStore::open(persistence).await.map_err(|e| {
            tracing::error!(
                path = %config.storage.orders_path.display(),
                error = %e,
                "Failed to load order store"
            );
            AppError::from(e)
        })?;

        let metrics = PaymentMetrics::new();
        let dispatcher =
            NotificationDispatcher::new(notifiers, config.notifications.timeout(), metrics.clone());
        let signer = SignatureEngine::new(config.merchant.secret_key.clone());

        let payments = PaymentRequestBuilder::new(
            config.merchant.clone(),
            config.catalog.clone(),
            config.server.public_base_url.clone(),
            store.clone(),
            metrics.clone(),
        );
        let callbacks = CallbackProcessor::new(
            signer,
            config.merchant.callback_signature,
            store.clone(),
            dispatcher.clone(),
            metrics.clone(),
        );

        let state = AppState {
            service_name: config.service_name.clone(),
            gateway_url: config.merchant.gateway_url.clone(),
            store,
            payments,
            callbacks,
            dispatcher,
            metrics,
        };

        // Port 0 picks a random port for testing.
        let host: IpAddr = config.server.host.parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("HOST is invalid: {}", e))
        })?;
        let addr = SocketAddr::new(host, config.common.port);
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port,
            callback_signature = %config.merchant.callback_signature,
            notifiers = ?state.dispatcher.channels(),
            "Checkout service configured"
        );

        Ok(Self {
            port,
            listener,
            state,
            config,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run until SIGINT/SIGTERM.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves, then wait (bounded) for pending
    /// notification deliveries.
    pub async fn run_until<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = build_router(self.state.clone());
        let grace = self.config.notifications.shutdown_grace();

        tracing::info!(port = self.port, "Listening");
        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        if self.state.dispatcher.shutdown(grace).await {
            tracing::info!("Service shutdown complete");
        } else {
            tracing::warn!("Service shutdown complete with undelivered notifications");
        }
        Ok(())
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route("/create-payment", post(handlers::payments::create_payment))
        .route("/server-callback", post(handlers::callback::server_callback))
        .route(
            "/payment-return",
            get(handlers::callback::payment_return).post(handlers::callback::payment_return),
        )
        .route(
            "/get-payment-status",
            get(handlers::payments::payment_status),
        )
        .route("/stats", get(handlers::stats::stats))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
