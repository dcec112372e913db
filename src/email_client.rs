use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::PoolConfig;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;

use crate::config::SmtpSettings;
use crate::domain::EmailAddress;

/// Seam between the relay and the upstream mail server.
///
/// Production wires in [`SmtpMailTransport`]; tests substitute their own
/// implementation to observe or fail deliveries.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, message: Message) -> Result<(), anyhow::Error>;
}

/// Pooled SMTP connection to the upstream relay.
pub struct SmtpMailTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailTransport {
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self, anyhow::Error> {
        let credentials = Credentials::new(
            settings.username.clone(),
            settings.password.expose_secret().clone(),
        );

        let builder = if settings.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };

        let inner = builder
            .port(settings.port)
            .credentials(credentials)
            .pool_config(PoolConfig::new().max_size(settings.pool_size))
            .build();

        Ok(Self { inner })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn deliver(&self, message: Message) -> Result<(), anyhow::Error> {
        self.inner.send(message).await?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to construct the outgoing message")]
    Message(#[source] anyhow::Error),
    #[error("delivery failed after {attempts} attempt(s)")]
    Exhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

/// Sends one rendered email through the transport, absorbing transient
/// upstream failures up to the configured retry budget.
pub struct DeliveryClient {
    transport: Arc<dyn MailTransport>,
    sender: EmailAddress,
    sender_name: String,
    retry: RetryPolicy,
}

impl DeliveryClient {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        sender: EmailAddress,
        sender_name: String,
        retry: RetryPolicy,
    ) -> Self {
        Self { transport, sender, sender_name, retry }
    }

    #[tracing::instrument(
        name = "Delivering email through the upstream transport",
        skip(self, html_body)
    )]
    pub async fn send_email(
        &self,
        recipient: &EmailAddress,
        display_name: Option<&str>,
        subject: &str,
        html_body: &str,
    ) -> Result<(), DeliveryError> {
        let message = self
            .build_message(recipient, display_name, subject, html_body)
            .map_err(DeliveryError::Message)?;

        let total_attempts = self.retry.attempts + 1;
        let mut attempt = 1;
        loop {
            match self.transport.deliver(message.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < total_attempts => {
                    tracing::warn!(
                        error.cause_chain = ?err,
                        attempt,
                        "Transport send failed, retrying after delay"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    tracing::error!(
                        error.cause_chain = ?source,
                        attempts = attempt,
                        "Transport send failed, retry budget exhausted"
                    );
                    return Err(DeliveryError::Exhausted { attempts: attempt, source });
                }
            }
        }
    }

    fn build_message(
        &self,
        recipient: &EmailAddress,
        display_name: Option<&str>,
        subject: &str,
        html_body: &str,
    ) -> Result<Message, anyhow::Error> {
        let sender_name = display_name.unwrap_or(&self.sender_name);
        let from = Mailbox::new(
            Some(sender_name.to_owned()),
            self.sender.as_ref().parse::<Address>()?,
        );
        let to = Mailbox::new(None, recipient.as_ref().parse::<Address>()?);

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_owned())?;

        Ok(message)
    }
}
