use super::error::{ApiJson, ApiPath, AppError, AppResult};
use super::{Admin, AppState, Customer, PaymentProvider};
use crate::catalog::{SlotInput, TrailerRefresh};
use crate::error::Error;
use crate::models::{Booking, Money, Movie, Show};
use crate::reservation::{BookingRequest, Confirmation, PaymentEvidence};
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

const SESSION_COMPLETED: &str = "checkout.session.completed";
const SESSION_EXPIRED: &str = "checkout.session.expired";

#[derive(Debug, Deserialize)]
pub struct AddShowsBody {
    #[serde(rename = "movieId")]
    pub movie_id: i64,
    #[serde(rename = "showsInput")]
    pub shows_input: Vec<SlotInput>,
    #[serde(rename = "showPrice")]
    pub show_price: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingBody {
    #[serde(rename = "showId")]
    pub show_id: Uuid,
    #[serde(rename = "selectedSeats")]
    pub selected_seats: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelBookingBody {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RepriceBody {
    #[serde(rename = "showPrice")]
    pub show_price: f64,
}

/// The subset of a checkout event the webhook acts on.
#[derive(Debug, Deserialize)]
pub struct PaymentEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "bookingId")]
    pub booking_id: Uuid,
    pub reference: Option<String>,
}

/// A booking with its show and movie attached, as listings display it.
#[derive(Debug, Serialize)]
struct BookingView {
    #[serde(flatten)]
    booking: Booking,
    show: Option<Show>,
    movie: Option<Movie>,
}

async fn with_details(state: &AppState, bookings: Vec<Booking>) -> Vec<BookingView> {
    let mut views = Vec::with_capacity(bookings.len());
    for booking in bookings {
        let show = state.store.show(booking.show_id).await;
        let movie = show.as_ref().and_then(|s| state.store.movie(s.movie_id));
        views.push(BookingView { booking, show, movie });
    }
    views
}

pub async fn now_playing(_: Admin, State(state): State<AppState>) -> AppResult<Json<Value>> {
    let movies = state.catalog.now_playing().await?;
    Ok(Json(json!({ "success": true, "movies": movies })))
}

#[instrument(skip_all, fields(movie_id = body.movie_id))]
pub async fn add_shows(
    _: Admin,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<AddShowsBody>,
) -> AppResult<Json<Value>> {
    let (movie, shows) = state
        .catalog
        .add_shows(body.movie_id, &body.shows_input, body.show_price)
        .await?;
    info!("Scheduled {} shows for {}", shows.len(), movie.title);
    Ok(Json(json!({
        "success": true,
        "message": "Show added successfully.",
        "created": shows.len(),
    })))
}

pub async fn upcoming_movies(State(state): State<AppState>) -> Json<Value> {
    let movies = state.catalog.upcoming_movies(Utc::now()).await;
    Json(json!({ "success": true, "shows": movies }))
}

pub async fn movie_schedule(State(state): State<AppState>, ApiPath(movie_id): ApiPath<i64>) -> AppResult<Json<Value>> {
    let schedule = state.catalog.movie_schedule(movie_id, Utc::now()).await?;
    Ok(Json(json!({
        "success": true,
        "movie": schedule.movie,
        "dateTime": schedule.date_time,
    })))
}

pub async fn refresh_trailer(
    _: Admin,
    State(state): State<AppState>,
    ApiPath(movie_id): ApiPath<i64>,
) -> AppResult<Json<Value>> {
    let body = match state.catalog.refresh_trailer(movie_id).await? {
        TrailerRefresh::Updated(key) => json!({ "success": true, "trailer": key }),
        TrailerRefresh::NotFound => json!({ "success": true, "trailer": null, "message": "No trailer found" }),
    };
    Ok(Json(body))
}

pub async fn refresh_all_trailers(_: Admin, State(state): State<AppState>) -> Json<Value> {
    let summary = state.catalog.refresh_all_trailers().await;
    Json(json!({ "success": true, "summary": summary }))
}

pub async fn occupied_seats(State(state): State<AppState>, ApiPath(show_id): ApiPath<Uuid>) -> AppResult<Json<Value>> {
    let seats = state.reservations.list_occupied_seats(show_id).await?;
    Ok(Json(json!({ "success": true, "occupiedSeats": seats })))
}

#[instrument(skip_all, fields(user_id = %customer.user_id, show_id = %body.show_id))]
pub async fn create_booking(
    customer: Customer,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreateBookingBody>,
) -> AppResult<Json<Value>> {
    let receipt = state
        .reservations
        .create_booking(BookingRequest {
            show_id: body.show_id,
            user_id: customer.user_id,
            seats: body.selected_seats,
            customer: customer.snapshot,
        })
        .await?;
    Ok(Json(json!({
        "success": true,
        "url": receipt.payment_url,
        "bookingId": receipt.booking_id,
        "amount": receipt.amount,
    })))
}

pub async fn user_bookings(customer: Customer, State(state): State<AppState>) -> Json<Value> {
    let bookings = state.reservations.bookings_for_user(&customer.user_id);
    let views = with_details(&state, bookings).await;
    Json(json!({ "success": true, "bookings": views }))
}

/// Applies a checkout event. Completed sessions confirm the booking; expired
/// sessions cancel it if it is still waiting for payment. Other event types
/// are acknowledged and ignored.
#[instrument(skip_all, fields(kind = %event.kind, booking_id = %event.booking_id))]
pub async fn payment_webhook(
    _: PaymentProvider,
    State(state): State<AppState>,
    ApiJson(event): ApiJson<PaymentEvent>,
) -> AppResult<Json<Value>> {
    match event.kind.as_str() {
        SESSION_COMPLETED => {
            let reference = event
                .reference
                .ok_or_else(|| AppError::BadRequest("completed event without a session reference".to_string()))?;
            let confirmation = state
                .reservations
                .confirm_payment(event.booking_id, PaymentEvidence { reference })
                .await?;
            let message = match confirmation {
                Confirmation::Confirmed(_) => "payment confirmed",
                Confirmation::AlreadyPaid(_) => "payment already recorded",
            };
            Ok(Json(json!({
                "success": true,
                "message": message,
                "status": confirmation.booking().status,
            })))
        }
        SESSION_EXPIRED => {
            let message = match state
                .reservations
                .cancel_unpaid(event.booking_id, "The payment session expired before payment was completed.")
                .await
            {
                Ok(_) => "booking cancelled".to_string(),
                // Already paid, swept or cancelled; nothing left to do.
                Err(Error::AlreadyTerminal { status, .. }) => format!("booking already {}", status),
                Err(e) => return Err(e.into()),
            };
            Ok(Json(json!({ "success": true, "message": message })))
        }
        other => {
            warn!("Ignoring payment event {}", other);
            Ok(Json(json!({ "success": true, "message": "event ignored" })))
        }
    }
}

pub async fn is_admin(_: Admin) -> Json<Value> {
    Json(json!({ "success": true, "isAdmin": true }))
}

pub async fn dashboard(_: Admin, State(state): State<AppState>) -> Json<Value> {
    let dashboard = state.reservations.dashboard(Utc::now()).await;
    Json(json!({ "success": true, "dashboardData": dashboard }))
}

pub async fn active_shows(_: Admin, State(state): State<AppState>) -> Json<Value> {
    let shows = state.reservations.active_shows(Utc::now()).await;
    Json(json!({ "success": true, "shows": shows }))
}

#[instrument(skip_all, fields(booking_id = %booking_id))]
pub async fn cancel_booking(
    _: Admin,
    State(state): State<AppState>,
    ApiPath(booking_id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<CancelBookingBody>,
) -> AppResult<Json<Value>> {
    let reason = body.reason.trim();
    if reason.is_empty() {
        return Err(Error::validation("a cancellation reason is required").into());
    }
    let booking = state.reservations.cancel_booking(booking_id, reason).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Booking cancelled.",
        "booking": booking,
    })))
}

#[instrument(skip_all, fields(show_id = %show_id))]
pub async fn reprice_show(
    _: Admin,
    State(state): State<AppState>,
    ApiPath(show_id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<RepriceBody>,
) -> AppResult<Json<Value>> {
    let price = Money::from_major(body.show_price)
        .ok_or_else(|| Error::validation("show price must be greater than zero"))?;
    let show = state.reservations.reprice_show(show_id, price).await?;
    info!("Show repriced to {}", show.price);
    Ok(Json(json!({ "success": true, "show": show })))
}

pub async fn all_bookings(_: Admin, State(state): State<AppState>) -> Json<Value> {
    let bookings = state.reservations.all_bookings();
    let views = with_details(&state, bookings).await;
    Json(json!({ "success": true, "bookings": views }))
}
