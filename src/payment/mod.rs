use crate::config::PaymentConfig;
use crate::http::HttpClient;
use crate::models::Booking;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, instrument};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.stripe.com";

/// Sessions cannot expire sooner than this on the provider side.
const SESSION_LIFETIME_MINUTES: i64 = 30;

/// How long a customer can still pay through a checkout session.
pub fn session_lifetime() -> chrono::Duration {
    chrono::Duration::minutes(SESSION_LIFETIME_MINUTES)
}

/// Hosted checkout session: provider reference plus the redirect for the customer.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub reference: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout(&self, booking: &Booking, movie_title: &str) -> Result<CheckoutSession>;
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

/// Stripe-compatible checkout session API.
pub struct StripeCheckout {
    http: HttpClient,
    config: PaymentConfig,
}

impl StripeCheckout {
    pub fn new(http: HttpClient, config: PaymentConfig) -> Result<Self> {
        Url::parse(&config.success_url).context("invalid payment successUrl")?;
        Url::parse(&config.cancel_url).context("invalid payment cancelUrl")?;
        Ok(Self { http, config })
    }

    fn sessions_url(&self) -> Result<String> {
        let base = Url::parse(self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL))
            .context("invalid payment baseUrl")?;
        Ok(base.join("/v1/checkout/sessions")?.to_string())
    }

    fn session_form(&self, booking: &Booking, movie_title: &str) -> Vec<(String, String)> {
        let currency = self.config.currency.as_deref().unwrap_or("usd");
        let expires_at = (Utc::now() + session_lifetime()).timestamp();
        vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), self.config.success_url.clone()),
            ("cancel_url".into(), self.config.cancel_url.clone()),
            ("client_reference_id".into(), booking.id.to_string()),
            ("customer_email".into(), booking.customer.email.clone()),
            ("metadata[bookingId]".into(), booking.id.to_string()),
            ("line_items[0][quantity]".into(), "1".into()),
            ("line_items[0][price_data][currency]".into(), currency.to_string()),
            ("line_items[0][price_data][unit_amount]".into(), booking.amount.cents().to_string()),
            (
                "line_items[0][price_data][product_data][name]".into(),
                format!("{} ({} seats)", movie_title, booking.seats.len()),
            ),
            ("expires_at".into(), expires_at.to_string()),
        ]
    }
}

#[async_trait]
impl PaymentGateway for StripeCheckout {
    #[instrument(skip(self, booking), fields(booking_id = %booking.id))]
    async fn create_checkout(&self, booking: &Booking, movie_title: &str) -> Result<CheckoutSession> {
        let url = self.sessions_url()?;
        let form = self.session_form(booking, movie_title);

        let session: SessionResponse = self
            .http
            .post_form_bearer(&url, &self.config.secret_key, &form)
            .await
            .context("creating checkout session")?;

        let redirect = session
            .url
            .ok_or_else(|| anyhow::anyhow!("checkout session {} has no redirect url", session.id))?;

        info!("Created checkout session {}", session.id);
        Ok(CheckoutSession {
            reference: session.id,
            url: redirect,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_booking;

    fn gateway() -> StripeCheckout {
        StripeCheckout::new(
            HttpClient::new().unwrap(),
            PaymentConfig {
                base_url: Some("http://localhost:12111".to_string()),
                secret_key: "sk_test".to_string(),
                currency: Some("inr".to_string()),
                success_url: "https://cinema.example/loading/my-bookings".to_string(),
                cancel_url: "https://cinema.example/my-bookings".to_string(),
                webhook_secret: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn session_form_carries_amount_and_booking_reference() {
        let booking = sample_booking(&["A1", "A2"], 1000);
        let form = gateway().session_form(&booking, "Dune");
        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(get("line_items[0][price_data][unit_amount]"), "2000");
        assert_eq!(get("line_items[0][price_data][currency]"), "inr");
        assert_eq!(get("metadata[bookingId]"), booking.id.to_string());
        assert_eq!(get("line_items[0][price_data][product_data][name]"), "Dune (2 seats)");
    }

    #[test]
    fn sessions_url_is_joined_to_base() {
        assert_eq!(
            gateway().sessions_url().unwrap(),
            "http://localhost:12111/v1/checkout/sessions"
        );
    }

    #[test]
    fn rejects_malformed_redirect_urls() {
        let result = StripeCheckout::new(
            HttpClient::new().unwrap(),
            PaymentConfig {
                base_url: None,
                secret_key: "sk".to_string(),
                currency: None,
                success_url: "not a url".to_string(),
                cancel_url: "https://cinema.example".to_string(),
                webhook_secret: None,
            },
        );
        assert!(result.is_err());
    }
}
