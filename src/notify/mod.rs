//! Transactional email delivery.
//!
//! The dispatcher validates the recipient, frames the body in the branded
//! template and hands it to a [`Mailer`], retrying transport failures with
//! exponential backoff. Exhausted retries come back as a
//! [`DeliveryStatus::Failed`] report rather than an error so callers can log
//! the failure and carry on.

pub mod retry;
pub mod smtp;
pub mod templates;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

pub use retry::RetryPolicy;
pub use templates::{Branding, EmailContent};

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Transport seam. Returns the provider's message id on success.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<String>;
}

#[derive(Debug, Error, PartialEq)]
pub enum NotifyError {
    #[error("invalid recipient address: {0:?}")]
    InvalidRecipient(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered {
        #[serde(rename = "messageId")]
        message_id: String,
        attempts: u32,
    },
    Failed {
        error: String,
        attempts: u32,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeliveryReport {
    pub to: String,
    #[serde(flatten)]
    pub status: DeliveryStatus,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self.status, DeliveryStatus::Delivered { .. })
    }
}

/// One message of a bulk send.
#[derive(Debug, Clone)]
pub struct EmailRequest {
    pub to: String,
    pub subject: String,
    pub body_html: String,
    pub use_template: bool,
}

impl EmailRequest {
    pub fn branded(to: impl Into<String>, content: EmailContent) -> Self {
        Self {
            to: to.into(),
            subject: content.subject,
            body_html: content.body_html,
            use_template: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<DeliveryReport>,
}

pub struct NotificationDispatcher {
    mailer: Arc<dyn Mailer>,
    retry: RetryPolicy,
    branding: Branding,
    in_flight: Semaphore,
}

impl NotificationDispatcher {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        retry: RetryPolicy,
        branding: Branding,
        max_in_flight: usize,
    ) -> Self {
        Self {
            mailer,
            retry,
            branding,
            in_flight: Semaphore::new(max_in_flight.max(1)),
        }
    }

    pub fn branding(&self) -> &Branding {
        &self.branding
    }

    #[instrument(skip(self, body_html), fields(to = %to))]
    pub async fn send(
        &self,
        to: &str,
        subject: &str,
        body_html: &str,
        use_template: bool,
    ) -> std::result::Result<DeliveryReport, NotifyError> {
        if subject.trim().is_empty() {
            return Err(NotifyError::MissingField("subject"));
        }
        if body_html.trim().is_empty() {
            return Err(NotifyError::MissingField("body"));
        }
        if !is_valid_address(to) {
            return Err(NotifyError::InvalidRecipient(to.to_string()));
        }

        let html = if use_template {
            self.branding.wrap(body_html, subject)
        } else {
            body_html.to_string()
        };
        let email = OutgoingEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html,
        };

        Ok(self.deliver_with_retry(&email).await)
    }

    /// Sends branded content, logging instead of returning any failure.
    pub async fn send_best_effort(&self, to: &str, content: &EmailContent) {
        match self.send(to, &content.subject, &content.body_html, true).await {
            Ok(report) if report.is_delivered() => {}
            Ok(report) => warn!(to = %report.to, "Notification not delivered: {:?}", report.status),
            Err(e) => warn!(to = %to, "Notification skipped: {}", e),
        }
    }

    async fn deliver_with_retry(&self, email: &OutgoingEmail) -> DeliveryReport {
        let _permit = match self.in_flight.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return DeliveryReport {
                    to: email.to.clone(),
                    status: DeliveryStatus::Failed {
                        error: e.to_string(),
                        attempts: 0,
                    },
                }
            }
        };

        let mut attempt = 1;
        loop {
            match self.mailer.deliver(email).await {
                Ok(message_id) => {
                    info!("Email sent successfully to {}", email.to);
                    return DeliveryReport {
                        to: email.to.clone(),
                        status: DeliveryStatus::Delivered {
                            message_id,
                            attempts: attempt,
                        },
                    };
                }
                Err(e) => {
                    error!(
                        "Attempt {}/{} to {} failed: {:#}",
                        attempt, self.retry.max_attempts, email.to, e
                    );
                    if !self.retry.should_retry(attempt) {
                        return DeliveryReport {
                            to: email.to.clone(),
                            status: DeliveryStatus::Failed {
                                error: format!("{e:#}"),
                                attempts: attempt,
                            },
                        };
                    }
                    sleep(self.retry.delay_after(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Sends each message in turn with `delay_between` between sends. One
    /// failure never stops the rest.
    #[instrument(skip(self, messages), fields(total = messages.len()))]
    pub async fn send_bulk(&self, messages: Vec<EmailRequest>, delay_between: Duration) -> BulkSummary {
        let total = messages.len();
        let mut results = Vec::with_capacity(total);

        for (index, message) in messages.into_iter().enumerate() {
            let report = match self
                .send(&message.to, &message.subject, &message.body_html, message.use_template)
                .await
            {
                Ok(report) => report,
                Err(e) => DeliveryReport {
                    to: message.to.clone(),
                    status: DeliveryStatus::Failed {
                        error: e.to_string(),
                        attempts: 0,
                    },
                },
            };
            results.push(report);

            if index + 1 < total && !delay_between.is_zero() {
                sleep(delay_between).await;
            }
        }

        let successful = results.iter().filter(|r| r.is_delivered()).count();
        info!("Bulk send finished: {}/{} delivered", successful, total);

        BulkSummary {
            total,
            successful,
            failed: total - successful,
            results,
        }
    }
}

/// `local@domain.tld` with no whitespace, as accepted by the SMTP builder.
pub fn is_valid_address(address: &str) -> bool {
    if address.chars().any(char::is_whitespace) {
        return false;
    }
    match address.parse::<lettre::Address>() {
        Ok(parsed) => {
            let domain = parsed.domain();
            domain
                .split('.')
                .filter(|label| !label.is_empty())
                .count()
                >= 2
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        Err(_) => false,
    }
}
