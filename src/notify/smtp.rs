use super::{Mailer, OutgoingEmail};
use crate::config::SmtpConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::PoolConfig;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

const DEFAULT_SMTP_PORT: u16 = 587;

/// Pooled STARTTLS transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .with_context(|| format!("invalid SMTP relay {}", config.host))?
            .port(config.port.unwrap_or(DEFAULT_SMTP_PORT))
            .pool_config(PoolConfig::new().max_size(config.max_connections.unwrap_or(5)));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        info!("SMTP transport configured for {}", config.host);
        Ok(Self {
            transport: builder.build(),
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<String> {
        let message = Message::builder()
            .from(self.from.parse().context("invalid sender address")?)
            .to(email.to.parse().context("invalid recipient address")?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())
            .context("failed to build message")?;

        let response = self.transport.send(message).await?;
        let message_id = response.message().collect::<Vec<_>>().join(" ");
        debug!(code = %response.code(), "SMTP accepted message");
        Ok(message_id)
    }
}

/// Stand-in used when no SMTP server is configured: logs and reports success.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<String> {
        info!(to = %email.to, subject = %email.subject, "SMTP not configured, email logged only");
        Ok(format!("logged-{}", uuid::Uuid::new_v4()))
    }
}
