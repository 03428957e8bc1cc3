use super::{admin_message, Notifier, NotifierError, PaymentNotification};
use crate::config::TelegramConfig;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Serialize;
use std::time::Duration;

/// Admin alerts through the Telegram Bot API.
pub struct TelegramNotifier {
    client: Client,
    config: TelegramConfig,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig, timeout: Duration) -> Result<Self, NotifierError> {
        if config.bot_token.expose_secret().is_empty() || config.chat_id.is_empty() {
            return Err(NotifierError::Configuration(
                "TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID must be set".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifierError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn send_message_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.bot_token.expose_secret()
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn channel(&self) -> &'static str {
        "telegram"
    }

    async fn notify_admin(&self, n: &PaymentNotification) -> Result<(), NotifierError> {
        let text = admin_message(n);
        let response = self
            .client
            .post(self.send_message_url())
            .json(&SendMessage {
                chat_id: &self.config.chat_id,
                text: &text,
                disable_web_page_preview: true,
            })
            .send()
            .await
            .map_err(|e| NotifierError::SendFailed(format!("Telegram request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError::SendFailed(format!(
                "Telegram API returned {}: {}",
                status, body
            )));
        }

        tracing::info!(order_reference = %n.order_reference, "Telegram admin alert sent");
        Ok(())
    }
}
