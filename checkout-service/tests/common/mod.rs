#![allow(dead_code)]

use checkout_service::config::{
    CheckoutConfig, MerchantConfig, NotificationSettings, ServerConfig, SmtpConfig,
    StorageConfig, TelegramConfig, DEFAULT_GATEWAY_URL, DEFAULT_TELEGRAM_API,
};
use checkout_service::models::Catalog;
use checkout_service::services::callback::GatewayNotification;
use checkout_service::services::notifications::{Notifier, RecordingNotifier};
use checkout_service::services::{CallbackSignatureScheme, SignatureEngine};
use checkout_service::{AppState, Application};
use secrecy::Secret;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const TEST_SECRET: &str = "test-merchant-secret";
pub const TEST_ACCOUNT: &str = "test_merch_n1";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
    pub notifier: Arc<RecordingNotifier>,
    pub state: AppState,
    pub orders_path: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<std::io::Result<()>>>,
    _dir: Option<TempDir>,
}

pub fn test_config(orders_path: PathBuf) -> CheckoutConfig {
    CheckoutConfig {
        common: service_core::config::Config {
            port: 0,
            ..Default::default()
        },
        service_name: "checkout-service-test".to_string(),
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            public_base_url: "https://shop.example.com".to_string(),
        },
        merchant: MerchantConfig {
            account: TEST_ACCOUNT.to_string(),
            domain_name: "shop.example.com".to_string(),
            secret_key: Secret::new(TEST_SECRET.to_string()),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            currency: "UAH".to_string(),
            language: "UA".to_string(),
            callback_signature: CallbackSignatureScheme::WayForPayV1,
        },
        catalog: Catalog::with_defaults(),
        storage: StorageConfig { orders_path },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 2525,
            user: String::new(),
            password: Secret::new(String::new()),
            from_email: "noreply@example.com".to_string(),
            from_name: "Checkout".to_string(),
            admin_email: None,
            enabled: false,
        },
        telegram: TelegramConfig {
            bot_token: Secret::new(String::new()),
            chat_id: String::new(),
            api_base_url: DEFAULT_TELEGRAM_API.to_string(),
            enabled: false,
        },
        notifications: NotificationSettings {
            timeout_secs: 5,
            shutdown_grace_secs: 5,
        },
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut app = Self::spawn_in(dir.path()).await;
        app._dir = Some(dir);
        app
    }

    /// Spawn against an existing data directory, e.g. to test restarts.
    pub async fn spawn_in(dir: &Path) -> Self {
        Self::spawn_with_config(test_config(dir.join("orders.json"))).await
    }

    pub async fn spawn_with_config(config: CheckoutConfig) -> Self {
        let orders_path = config.storage.orders_path.clone();
        let notifier = Arc::new(RecordingNotifier::new());
        let app = Application::build_with_notifiers(
            config,
            vec![notifier.clone() as Arc<dyn Notifier>],
        )
        .await
        .expect("Failed to build test application");

        let port = app.port();
        let state = app.state();
        let (tx, rx) = oneshot::channel::<()>();

        let server = tokio::spawn(app.run_until(async move {
            rx.await.ok();
        }));

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to build HTTP client");

        let address = format!("http://127.0.0.1:{}", port);
        for _ in 0..50 {
            if client.get(format!("{}/health", address)).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            client,
            notifier,
            state,
            orders_path,
            shutdown: Some(tx),
            server: Some(server),
            _dir: None,
        }
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        if let Some(server) = self.server.take() {
            server
                .await
                .expect("Server task panicked")
                .expect("Server failed");
        }
    }

    pub async fn create_payment(&self, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}/create-payment", self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn create_payment_form(&self, fields: &[(&str, &str)]) -> reqwest::Response {
        self.client
            .post(format!("{}/create-payment", self.address))
            .form(fields)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Create an order and return its reference.
    pub async fn create_order(&self, product: &str) -> String {
        let response = self
            .create_payment(&serde_json::json!({
                "name": "Olena",
                "email": "olena@example.com",
                "product": product,
            }))
            .await;
        assert_eq!(response.status().as_u16(), 200);

        let body: Value = response.json().await.expect("Failed to parse JSON");
        body["payload"]["orderReference"]
            .as_str()
            .expect("orderReference missing")
            .to_string()
    }

    pub async fn post_callback_json(&self, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}/server-callback", self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_callback_raw(&self, content_type: &str, body: String) -> reqwest::Response {
        self.client
            .post(format!("{}/server-callback", self.address))
            .header("content-type", content_type)
            .body(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn payment_status(&self, order_id: &str) -> reqwest::Response {
        self.client
            .get(format!("{}/get-payment-status", self.address))
            .query(&[("order_id", order_id)])
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Wait until background notification deliveries have finished.
    pub async fn drain_notifications(&self) {
        self.state.dispatcher.drain().await;
    }
}

pub fn engine() -> SignatureEngine {
    SignatureEngine::new(Secret::new(TEST_SECRET.to_string()))
}

/// Gateway notification for `reference`, signed with the test secret.
pub fn signed_callback(reference: &str, status: &str) -> Value {
    let mut body = serde_json::json!({
        "merchantAccount": TEST_ACCOUNT,
        "orderReference": reference,
        "amount": 1,
        "currency": "UAH",
        "authCode": "541963",
        "cardPan": "41****8217",
        "transactionStatus": status,
        "reasonCode": 1100,
        "processingDate": 1700000000,
    });
    sign(&mut body);
    body
}

pub fn sign(body: &mut Value) {
    let object = body.as_object().expect("callback must be an object").clone();
    let notification = GatewayNotification::from_object(object);
    let fields = CallbackSignatureScheme::WayForPayV1.signed_fields(|name| notification.get(name));
    body["merchantSignature"] = Value::String(engine().sign(&fields).expect("Failed to sign"));
}
