use super::{admin_message, Notifier, NotifierError, PaymentNotification};
use crate::config::SmtpConfig;
use askama::Template;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use std::time::Duration;

/// Customer confirmations and admin emails over SMTP (STARTTLS relay).
pub struct SmtpNotifier {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig, timeout: Duration) -> Result<Self, NotifierError> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                NotifierError::Configuration(format!("Failed to create SMTP relay: {}", e))
            })?
            .port(config.port)
            .credentials(creds)
            .timeout(Some(timeout))
            .build();

        tracing::info!(host = %config.host, port = config.port, "SMTP notifier initialized");

        Ok(Self { config, transport })
    }

    fn from_mailbox(&self) -> Result<Mailbox, NotifierError> {
        format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| NotifierError::Configuration(format!("Invalid from address: {}", e)))
    }

    async fn send(&self, to: &str, subject: &str, text: String, html: String) -> Result<(), NotifierError> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| NotifierError::SendFailed(format!("Invalid recipient: {}", e)))?;

        let message = Message::builder()
            .from(self.from_mailbox()?)
            .to(to_mailbox)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html),
                    ),
            )
            .map_err(|e| NotifierError::SendFailed(format!("Failed to build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifierError::SendFailed(format!("Failed to send email: {}", e)))?;

        tracing::info!(to = %to, subject = %subject, "Email sent successfully");
        Ok(())
    }
}

pub fn customer_subject(n: &PaymentNotification) -> String {
    format!("Payment confirmed: {}", n.product_description)
}

pub fn customer_text(n: &PaymentNotification) -> String {
    format!(
        "Hello, {}!\n\nWe received your payment of {} {} for \"{}\".\nOrder reference: {}\n\nThank you!",
        n.customer_name,
        n.amount.normalize(),
        n.currency,
        n.product_description,
        n.order_reference
    )
}

#[derive(Template)]
#[template(path = "customer_email.html")]
struct CustomerEmailTemplate<'a> {
    name: &'a str,
    amount: String,
    currency: &'a str,
    product: &'a str,
    reference: &'a str,
}

#[derive(Template)]
#[template(path = "admin_email.html")]
struct AdminEmailTemplate<'a> {
    summary: &'a str,
}

fn render(template: &impl Template) -> Result<String, NotifierError> {
    template
        .render()
        .map_err(|e| NotifierError::SendFailed(format!("Failed to render email: {}", e)))
}

pub fn customer_html(n: &PaymentNotification) -> Result<String, NotifierError> {
    render(&CustomerEmailTemplate {
        name: &n.customer_name,
        amount: n.amount.normalize().to_string(),
        currency: &n.currency,
        product: &n.product_description,
        reference: &n.order_reference,
    })
}

pub fn admin_html(summary: &str) -> Result<String, NotifierError> {
    render(&AdminEmailTemplate { summary })
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn channel(&self) -> &'static str {
        "smtp"
    }

    async fn notify_customer(&self, n: &PaymentNotification) -> Result<(), NotifierError> {
        self.send(
            &n.customer_email,
            &customer_subject(n),
            customer_text(n),
            customer_html(n)?,
        )
        .await
    }

    async fn notify_admin(&self, n: &PaymentNotification) -> Result<(), NotifierError> {
        let admin = self.config.admin_email.as_deref().ok_or_else(|| {
            NotifierError::NotEnabled("ADMIN_EMAIL is not configured".to_string())
        })?;

        let text = admin_message(n);
        let html = admin_html(&text)?;
        self.send(admin, &format!("New payment {}", n.order_reference), text, html)
            .await
    }
}
