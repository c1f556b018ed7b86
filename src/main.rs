mod api;
mod catalog;
mod config;
mod error;
mod http;
mod models;
mod notify;
mod payment;
mod reservation;
mod store;
#[cfg(test)]
mod testing;
mod tmdb;

use anyhow::{anyhow, Context, Result};
use api::{AppState, Secrets};
use catalog::{CatalogIngestor, CatalogSettings};
use clap::Parser;
use config::Configuration;
use http::HttpClient;
use notify::smtp::{LogMailer, SmtpMailer};
use notify::{Branding, Mailer, NotificationDispatcher, RetryPolicy};
use payment::StripeCheckout;
use reservation::{ReservationEngine, ReservationPolicy};
use std::sync::Arc;
use store::Store;
use tmdb::TmdbClient;
use tokio::time::interval;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .init();

    info!("Starting Marquee v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Configuration::from_file(&cli.config)?);
    info!("Configuration loaded from: {}", cli.config);

    let http_client = HttpClient::new()?;
    let store = Arc::new(Store::new());
    for subscriber in &config.subscribers {
        store.add_subscriber(subscriber.clone());
    }

    let notifier = Arc::new(NotificationDispatcher::new(
        build_mailer(&config)?,
        RetryPolicy::new(config.retry_attempts(), config.retry_base_delay()),
        branding(&config),
        config.max_in_flight_messages(),
    ));

    let tmdb_config = config
        .tmdb
        .clone()
        .ok_or_else(|| anyhow!("the tmdb section is required"))?;
    let catalog = Arc::new(CatalogIngestor::new(
        Arc::new(TmdbClient::new(http_client.clone(), tmdb_config)),
        Arc::clone(&store),
        Arc::clone(&notifier),
        CatalogSettings {
            now_playing_pages: config.now_playing_pages(),
            trailer_refresh_delay: config.trailer_refresh_delay(),
            announcement_delay: config.bulk_delay(),
            offset: config.local_offset(),
        },
    ));

    let payment_config = config
        .payment
        .clone()
        .ok_or_else(|| anyhow!("the payment section is required"))?;
    let policy = ReservationPolicy {
        hold_window: config.hold_window(),
        max_seats_per_booking: config.max_seats_per_booking(),
        reminder_lead: config.reminder_lead(),
    };
    if !policy.covers_checkout(payment::session_lifetime()) {
        warn!(
            "Hold window of {} min is shorter than the {} min checkout session; payments made after a hold expires are refused and logged for refund",
            policy.hold_window.num_minutes(),
            payment::session_lifetime().num_minutes()
        );
    }
    let reservations = Arc::new(ReservationEngine::new(
        Arc::clone(&store),
        Arc::new(StripeCheckout::new(http_client.clone(), payment_config)?),
        Arc::clone(&notifier),
        policy,
    ));

    let secrets = Secrets {
        admin_token: config.admin_token().map(str::to_string),
        webhook_secret: config.webhook_secret().map(str::to_string),
    };
    if secrets.admin_token.is_none() {
        warn!("No admin token configured, admin routes are disabled");
    }
    if secrets.webhook_secret.is_none() {
        warn!("No webhook secret configured, payment confirmations will be rejected");
    }

    let sweeps = vec![
        tokio::spawn(expiry_sweep(Arc::clone(&config), Arc::clone(&reservations))),
        tokio::spawn(reminder_sweep(Arc::clone(&reservations))),
    ];

    let app = api::router(AppState {
        catalog,
        reservations,
        store,
        secrets: Arc::new(secrets),
    });

    let bind = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("Listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for sweep in sweeps {
        sweep.abort();
    }
    info!("Shut down");
    Ok(())
}

fn build_mailer(config: &Configuration) -> Result<Arc<dyn Mailer>> {
    match &config.smtp {
        Some(smtp) => Ok(Arc::new(SmtpMailer::new(smtp)?)),
        None => {
            warn!("No SMTP configuration found, emails will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}

fn branding(config: &Configuration) -> Branding {
    let mut branding = Branding {
        offset: config.local_offset(),
        ..Branding::default()
    };
    if let Some(mail) = &config.mail {
        if let Some(name) = &mail.brand_name {
            branding.name = name.clone();
        }
        if let Some(url) = &mail.website_url {
            branding.website_url = url.clone();
        }
        if let Some(support) = &mail.support_email {
            branding.support_email = support.clone();
        }
    }
    branding
}

async fn expiry_sweep(config: Arc<Configuration>, reservations: Arc<ReservationEngine>) {
    let mut interval = interval(config.sweep_interval());

    loop {
        interval.tick().await;
        let expired = reservations.expire_stale_pending(chrono::Utc::now()).await;
        if !expired.is_empty() {
            info!("Released seats of {} unpaid bookings", expired.len());
        }
    }
}

async fn reminder_sweep(reservations: Arc<ReservationEngine>) {
    // Hourly, so a show is picked up well inside the reminder lead.
    let mut interval = interval(std::time::Duration::from_secs(60 * 60));
    let lead = reservations.policy().reminder_lead;

    loop {
        interval.tick().await;
        let sent = reservations.send_show_reminders(chrono::Utc::now()).await;
        if sent > 0 {
            info!("Sent {} reminders for shows in the next {} hours", sent, lead.num_hours());
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
