//! JSON HTTP surface over the catalog and reservation engines.
//!
//! Customer identity is asserted by the fronting gateway through the
//! `x-user-*` headers; admin routes and the payment webhook each require a
//! shared secret header.

pub mod error;
mod handlers;

use crate::catalog::CatalogIngestor;
use crate::models::CustomerSnapshot;
use crate::reservation::ReservationEngine;
use crate::store::Store;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::Router;
use error::AppError;
use std::sync::Arc;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Shared secrets checked by the extractors. A secret that is not configured
/// locks its routes entirely.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub admin_token: Option<String>,
    pub webhook_secret: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogIngestor>,
    pub reservations: Arc<ReservationEngine>,
    pub store: Arc<Store>,
    pub secrets: Arc<Secrets>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/show/now-playing", get(handlers::now_playing))
        .route("/api/show/add", post(handlers::add_shows))
        .route("/api/show/all", get(handlers::upcoming_movies))
        .route("/api/show/trailers/refresh", post(handlers::refresh_all_trailers))
        .route("/api/show/{movie_id}", get(handlers::movie_schedule))
        .route("/api/show/{movie_id}/trailer", post(handlers::refresh_trailer))
        .route("/api/booking/seats/{show_id}", get(handlers::occupied_seats))
        .route("/api/booking/create", post(handlers::create_booking))
        .route("/api/user/bookings", get(handlers::user_bookings))
        .route("/api/payment/webhook", post(handlers::payment_webhook))
        .route("/api/admin/is-admin", get(handlers::is_admin))
        .route("/api/admin/dashboard", get(handlers::dashboard))
        .route("/api/admin/shows", get(handlers::active_shows))
        .route("/api/admin/bookings", get(handlers::all_bookings))
        .route("/api/admin/bookings/{booking_id}/cancel", post(handlers::cancel_booking))
        .route("/api/admin/shows/{show_id}/price", post(handlers::reprice_show))
        .with_state(state)
}

/// The customer on whose behalf a request is made.
#[derive(Debug, Clone)]
pub struct Customer {
    pub user_id: String,
    pub snapshot: CustomerSnapshot,
}

impl FromRequestParts<AppState> for Customer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized("not authorized, sign in first".to_string()))?;
        let name = header(parts, USER_NAME_HEADER).unwrap_or_default();
        let email = header(parts, USER_EMAIL_HEADER).unwrap_or_default();

        Ok(Customer {
            user_id,
            snapshot: CustomerSnapshot { name, email },
        })
    }
}

/// Proof that the caller presented the configured admin token.
#[derive(Debug, Clone, Copy)]
pub struct Admin;

impl FromRequestParts<AppState> for Admin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected = state.secrets.admin_token.as_deref();
        if secret_matches(expected, header(parts, ADMIN_TOKEN_HEADER).as_deref()) {
            Ok(Admin)
        } else {
            Err(AppError::Unauthorized("not authorized".to_string()))
        }
    }
}

/// Proof that the caller is the payment provider.
#[derive(Debug, Clone, Copy)]
pub struct PaymentProvider;

impl FromRequestParts<AppState> for PaymentProvider {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected = state.secrets.webhook_secret.as_deref();
        if secret_matches(expected, header(parts, WEBHOOK_SECRET_HEADER).as_deref()) {
            Ok(PaymentProvider)
        } else {
            Err(AppError::Unauthorized("invalid webhook secret".to_string()))
        }
    }
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn secret_matches(expected: Option<&str>, presented: Option<&str>) -> bool {
    match (expected, presented) {
        (Some(expected), Some(presented)) => {
            expected.len() == presented.len()
                && expected
                    .bytes()
                    .zip(presented.bytes())
                    .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                    == 0
        }
        _ => false,
    }
}
