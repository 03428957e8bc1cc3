use rust_decimal::Decimal;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::{Catalog, CatalogEntry};
use crate::services::signature::CallbackSignatureScheme;

pub const DEFAULT_GATEWAY_URL: &str = "https://secure.wayforpay.com/pay";
pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub server: ServerConfig,
    pub merchant: MerchantConfig,
    pub catalog: Catalog,
    pub storage: StorageConfig,
    pub smtp: SmtpConfig,
    pub telegram: TelegramConfig,
    pub notifications: NotificationSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    /// Externally reachable origin used to build gateway callback URLs.
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MerchantConfig {
    pub account: String,
    pub domain_name: String,
    pub secret_key: Secret<String>,
    pub gateway_url: String,
    pub currency: String,
    pub language: String,
    pub callback_signature: CallbackSignatureScheme,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub orders_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: String,
    /// Recipient of the "new payment" admin email.
    pub admin_email: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Secret<String>,
    pub chat_id: String,
    pub api_base_url: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSettings {
    pub timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl NotificationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl CheckoutConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let port = match env::var("PORT") {
            Ok(port) => parse(&port, "PORT")?,
            Err(_) => common.port,
        };

        Ok(CheckoutConfig {
            common: core_config::Config { port, ..common },
            service_name: "checkout-service".to_string(),
            server: ServerConfig {
                host: get_env("HOST", Some("0.0.0.0"), false)?,
                public_base_url: get_env("PUBLIC_BASE_URL", Some("http://localhost:3000"), is_prod)?
                    .trim_end_matches('/')
                    .to_string(),
            },
            merchant: MerchantConfig {
                account: get_env("MERCHANT_ACCOUNT", Some("test_merch_n1"), is_prod)?,
                domain_name: get_env("MERCHANT_DOMAIN_NAME", Some("localhost"), is_prod)?,
                secret_key: Secret::new(get_env(
                    "MERCHANT_SECRET_KEY",
                    Some("flk3409refn54t54t*FNJRET"),
                    is_prod,
                )?),
                gateway_url: get_env("MERCHANT_GATEWAY_URL", Some(DEFAULT_GATEWAY_URL), false)?,
                currency: get_env("MERCHANT_CURRENCY", Some("UAH"), false)?,
                language: get_env("MERCHANT_LANGUAGE", Some("UA"), false)?,
                callback_signature: parse(
                    &get_env("MERCHANT_CALLBACK_SIGNATURE", Some("wayforpay-v1"), false)?,
                    "MERCHANT_CALLBACK_SIGNATURE",
                )?,
            },
            catalog: Catalog {
                solo: CatalogEntry {
                    name: get_env("PRODUCT_SOLO_NAME", Some("Plan: Self-study"), false)?,
                    price: parse(
                        &get_env("PRODUCT_SOLO_PRICE", Some("1"), false)?,
                        "PRODUCT_SOLO_PRICE",
                    )?,
                },
                support: CatalogEntry {
                    name: get_env("PRODUCT_SUPPORT_NAME", Some("Plan: With support"), false)?,
                    price: parse(
                        &get_env("PRODUCT_SUPPORT_PRICE", Some("777"), false)?,
                        "PRODUCT_SUPPORT_PRICE",
                    )?,
                },
            },
            storage: StorageConfig {
                orders_path: PathBuf::from(get_env("ORDERS_FILE", Some("orders.json"), false)?),
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod)?,
                port: parse(&get_env("SMTP_PORT", Some("587"), false)?, "SMTP_PORT")?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: Secret::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
                from_email: get_env("SMTP_FROM_EMAIL", Some("noreply@example.com"), is_prod)?,
                from_name: get_env("SMTP_FROM_NAME", Some("Checkout"), false)?,
                admin_email: env::var("ADMIN_EMAIL").ok().filter(|s| !s.is_empty()),
                enabled: flag("SMTP_ENABLED"),
            },
            telegram: TelegramConfig {
                bot_token: Secret::new(get_env("TELEGRAM_BOT_TOKEN", Some(""), false)?),
                chat_id: get_env("TELEGRAM_CHAT_ID", Some(""), false)?,
                api_base_url: get_env("TELEGRAM_API_URL", Some(DEFAULT_TELEGRAM_API), false)?,
                enabled: flag("TELEGRAM_ENABLED"),
            },
            notifications: NotificationSettings {
                timeout_secs: parse(
                    &get_env("NOTIFICATION_TIMEOUT_SECS", Some("10"), false)?,
                    "NOTIFICATION_TIMEOUT_SECS",
                )?,
                shutdown_grace_secs: parse(
                    &get_env("NOTIFICATION_SHUTDOWN_GRACE_SECS", Some("15"), false)?,
                    "NOTIFICATION_SHUTDOWN_GRACE_SECS",
                )?,
            },
        })
    }
}

impl Catalog {
    /// Prices used when nothing else is configured.
    pub fn with_defaults() -> Self {
        Catalog {
            solo: CatalogEntry {
                name: "Plan: Self-study".to_string(),
                price: Decimal::ONE,
            },
            support: CatalogEntry {
                name: "Plan: With support".to_string(),
                price: Decimal::from(777),
            },
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse<T>(value: &str, key: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

fn flag(key: &str) -> bool {
    env::var(key)
        .unwrap_or_else(|_| "false".to_string())
        .parse()
        .unwrap_or(false)
}
