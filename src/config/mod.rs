use crate::models::Subscriber;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Configuration {
    pub server: Option<ServerConfig>,
    pub tmdb: Option<TmdbConfig>,
    pub payment: Option<PaymentConfig>,
    pub smtp: Option<SmtpConfig>,
    pub mail: Option<MailConfig>,
    pub reservation: Option<ReservationConfig>,
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub subscribers: Vec<Subscriber>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    #[serde(rename = "adminToken")]
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TmdbConfig {
    #[serde(rename = "baseUrl")]
    pub base_url: Option<String>,
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(rename = "nowPlayingPages")]
    pub now_playing_pages: Option<u32>,
    #[serde(rename = "trailerRefreshDelayMs")]
    pub trailer_refresh_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentConfig {
    #[serde(rename = "baseUrl")]
    pub base_url: Option<String>,
    #[serde(rename = "secretKey")]
    pub secret_key: String,
    pub currency: Option<String>,
    #[serde(rename = "successUrl")]
    pub success_url: String,
    #[serde(rename = "cancelUrl")]
    pub cancel_url: String,
    #[serde(rename = "webhookSecret")]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    #[serde(rename = "maxConnections")]
    pub max_connections: Option<u32>,
    #[serde(rename = "maxMessages")]
    pub max_messages: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MailConfig {
    #[serde(rename = "retryAttempts")]
    pub retry_attempts: Option<u32>,
    #[serde(rename = "retryBaseDelayMs")]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(rename = "bulkDelayMs")]
    pub bulk_delay_ms: Option<u64>,
    #[serde(rename = "brandName")]
    pub brand_name: Option<String>,
    #[serde(rename = "websiteUrl")]
    pub website_url: Option<String>,
    #[serde(rename = "supportEmail")]
    pub support_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReservationConfig {
    #[serde(rename = "holdWindowMinutes")]
    pub hold_window_minutes: Option<i64>,
    #[serde(rename = "maxSeatsPerBooking")]
    pub max_seats_per_booking: Option<usize>,
    #[serde(rename = "sweepIntervalSeconds")]
    pub sweep_interval_seconds: Option<u64>,
    #[serde(rename = "reminderLeadHours")]
    pub reminder_lead_hours: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(rename = "utcOffsetMinutes")]
    pub utc_offset_minutes: i32,
}

impl Configuration {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Configuration = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.server.as_ref().and_then(|s| s.admin_token.as_deref())
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.payment
            .as_ref()
            .and_then(|p| p.webhook_secret.as_deref())
    }

    pub fn now_playing_pages(&self) -> u32 {
        self.tmdb
            .as_ref()
            .and_then(|t| t.now_playing_pages)
            .unwrap_or(3)
    }

    pub fn trailer_refresh_delay(&self) -> Duration {
        Duration::from_millis(
            self.tmdb
                .as_ref()
                .and_then(|t| t.trailer_refresh_delay_ms)
                .unwrap_or(250),
        )
    }

    pub fn retry_attempts(&self) -> u32 {
        self.mail
            .as_ref()
            .and_then(|m| m.retry_attempts)
            .unwrap_or(3)
            .max(1)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(
            self.mail
                .as_ref()
                .and_then(|m| m.retry_base_delay_ms)
                .unwrap_or(1000),
        )
    }

    pub fn bulk_delay(&self) -> Duration {
        Duration::from_millis(self.mail.as_ref().and_then(|m| m.bulk_delay_ms).unwrap_or(100))
    }

    pub fn max_in_flight_messages(&self) -> usize {
        self.smtp
            .as_ref()
            .and_then(|s| s.max_messages)
            .unwrap_or(100)
            .max(1)
    }

    pub fn hold_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(
            self.reservation
                .as_ref()
                .and_then(|r| r.hold_window_minutes)
                .unwrap_or(15),
        )
    }

    pub fn max_seats_per_booking(&self) -> usize {
        self.reservation
            .as_ref()
            .and_then(|r| r.max_seats_per_booking)
            .unwrap_or(5)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(
            self.reservation
                .as_ref()
                .and_then(|r| r.sweep_interval_seconds)
                .unwrap_or(60),
        )
    }

    pub fn reminder_lead(&self) -> chrono::Duration {
        chrono::Duration::hours(
            self.reservation
                .as_ref()
                .and_then(|r| r.reminder_lead_hours)
                .unwrap_or(8),
        )
    }

    /// Offset used to read operator-entered slots and to print show times.
    pub fn local_offset(&self) -> FixedOffset {
        let minutes = self.schedule.as_ref().map_or(0, |s| s.utc_offset_minutes);
        FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
server:
  bind: "127.0.0.1:8080"
  adminToken: "s3cret"
tmdb:
  apiKey: "token"
  nowPlayingPages: 2
payment:
  secretKey: "sk_test"
  successUrl: "https://cinema.example/my-bookings"
  cancelUrl: "https://cinema.example/"
  webhookSecret: "whsec"
reservation:
  holdWindowMinutes: 10
  maxSeatsPerBooking: 8
schedule:
  utcOffsetMinutes: 330
subscribers:
  - name: "Ana"
    email: "ana@example.com"
"#;

    #[test]
    fn parses_yaml_and_applies_overrides() {
        let config = Configuration::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.admin_token(), Some("s3cret"));
        assert_eq!(config.webhook_secret(), Some("whsec"));
        assert_eq!(config.now_playing_pages(), 2);
        assert_eq!(config.hold_window(), chrono::Duration::minutes(10));
        assert_eq!(config.max_seats_per_booking(), 8);
        assert_eq!(config.local_offset().local_minus_utc(), 330 * 60);
        assert_eq!(config.subscribers.len(), 1);
    }

    #[test]
    fn empty_configuration_uses_policy_defaults() {
        let config = Configuration::default();
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
        assert_eq!(config.hold_window(), chrono::Duration::minutes(15));
        assert_eq!(config.max_seats_per_booking(), 5);
        assert_eq!(config.retry_attempts(), 3);
        assert_eq!(config.retry_base_delay(), Duration::from_secs(1));
        assert_eq!(config.bulk_delay(), Duration::from_millis(100));
        assert_eq!(config.trailer_refresh_delay(), Duration::from_millis(250));
        assert_eq!(config.max_in_flight_messages(), 100);
        assert_eq!(config.reminder_lead(), chrono::Duration::hours(8));
        assert_eq!(config.local_offset().local_minus_utc(), 0);
    }
}
