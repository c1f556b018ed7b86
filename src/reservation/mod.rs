//! Seat reservation and booking lifecycle.
//!
//! A booking starts `PENDING` holding its seats, then ends `PAID` (seats kept),
//! `EXPIRED` or `CANCELLED` (seats released). Every seat check and every seat
//! release happens while holding the lock of the affected show, so
//! check-and-reserve is atomic per show and shows never block each other.
//! Calls to the payment provider and the mailer happen outside that lock.

use crate::error::{Error, Result};
use crate::models::{Booking, BookingStatus, CustomerSnapshot, Money, Movie, SeatId, Show};
use crate::notify::templates::{booking_cancelled, booking_confirmed, show_reminder, ConfirmedBooking};
use crate::notify::{is_valid_address, NotificationDispatcher};
use crate::payment::PaymentGateway;
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ReservationPolicy {
    /// How long a pending booking may hold seats without payment.
    pub hold_window: Duration,
    pub max_seats_per_booking: usize,
    pub reminder_lead: Duration,
}

impl ReservationPolicy {
    /// Whether a hold lasts at least as long as a checkout session, so no
    /// customer can pay for seats that were already released.
    pub fn covers_checkout(&self, session_lifetime: Duration) -> bool {
        self.hold_window >= session_lifetime
    }
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            hold_window: Duration::minutes(15),
            max_seats_per_booking: 5,
            reminder_lead: Duration::hours(8),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub show_id: Uuid,
    pub user_id: String,
    pub seats: Vec<String>,
    pub customer: CustomerSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingReceipt {
    #[serde(rename = "bookingId")]
    pub booking_id: Uuid,
    #[serde(rename = "url")]
    pub payment_url: String,
    pub amount: Money,
}

/// What the payment provider reported; `reference` is its session id.
#[derive(Debug, Clone)]
pub struct PaymentEvidence {
    pub reference: String,
}

#[derive(Debug, Clone)]
pub enum Confirmation {
    Confirmed(Booking),
    /// Duplicate signal for a booking that is already paid.
    AlreadyPaid(Booking),
}

impl Confirmation {
    pub fn booking(&self) -> &Booking {
        match self {
            Confirmation::Confirmed(b) | Confirmation::AlreadyPaid(b) => b,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowOverview {
    #[serde(flatten)]
    pub show: Show,
    pub movie: Option<Movie>,
    #[serde(rename = "occupiedCount")]
    pub occupied_count: usize,
    pub earnings: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    #[serde(rename = "totalBookings")]
    pub total_bookings: usize,
    #[serde(rename = "totalRevenue")]
    pub total_revenue: Money,
    #[serde(rename = "activeShows")]
    pub active_shows: Vec<ShowOverview>,
    #[serde(rename = "totalUser")]
    pub total_users: usize,
}

pub struct ReservationEngine {
    store: Arc<Store>,
    payments: Arc<dyn PaymentGateway>,
    notifier: Arc<NotificationDispatcher>,
    policy: ReservationPolicy,
}

impl ReservationEngine {
    pub fn new(
        store: Arc<Store>,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<NotificationDispatcher>,
        policy: ReservationPolicy,
    ) -> Self {
        Self {
            store,
            payments,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    /// Seats held by pending or paid bookings, read under the show lock.
    pub async fn list_occupied_seats(&self, show_id: Uuid) -> Result<Vec<SeatId>> {
        let handle = self
            .store
            .show_handle(show_id)
            .ok_or(Error::ShowNotFound(show_id))?;
        let mut show = handle.lock().await;
        self.release_stale_locked(&mut show, Utc::now());
        Ok(show.occupied_seats.keys().cloned().collect())
    }

    #[instrument(skip(self, request), fields(show_id = %request.show_id, user_id = %request.user_id))]
    pub async fn create_booking(&self, request: BookingRequest) -> Result<BookingReceipt> {
        let seats = self.validate_seats(&request.seats)?;
        validate_customer(&request.user_id, &request.customer)?;

        let handle = self
            .store
            .show_handle(request.show_id)
            .ok_or(Error::ShowNotFound(request.show_id))?;

        let (booking, movie_id) = {
            let mut show = handle.lock().await;
            let now = Utc::now();
            if show.starts_at <= now {
                return Err(Error::ShowInPast(show.id));
            }
            self.release_stale_locked(&mut show, now);

            let taken: Vec<SeatId> = seats
                .iter()
                .filter(|seat| show.occupied_seats.contains_key(*seat))
                .cloned()
                .collect();
            if !taken.is_empty() {
                debug!("Seat conflict on {:?}", taken);
                return Err(Error::SeatConflict { seats: taken });
            }

            let booking = Booking {
                id: Uuid::new_v4(),
                user_id: request.user_id.clone(),
                show_id: show.id,
                amount: show.price.times(seats.len()),
                seats,
                status: BookingStatus::Pending,
                created_at: now,
                payment_reference: None,
                payment_link: None,
                paid_at: None,
                reminder_sent_at: None,
                customer: request.customer.clone(),
            };
            for seat in &booking.seats {
                show.occupied_seats.insert(seat.clone(), booking.id);
            }
            self.store.put_booking(booking.clone());
            (booking, show.movie_id)
        };

        info!(booking_id = %booking.id, "Seats held: {:?}", booking.seats);
        self.store.add_subscriber(request.customer.into());

        let title = self.movie_title(movie_id);
        let session = match self.payments.create_checkout(&booking, &title).await {
            Ok(session) => session,
            Err(e) => {
                warn!(booking_id = %booking.id, "Checkout failed, releasing seats: {:#}", e);
                let mut show = handle.lock().await;
                if self.store.booking(booking.id).map(|b| b.status) == Some(BookingStatus::Pending) {
                    self.transition_locked(&mut show, booking.id, BookingStatus::Cancelled);
                }
                return Err(Error::upstream(e));
            }
        };

        {
            let _show = handle.lock().await;
            let current = self
                .store
                .booking(booking.id)
                .ok_or(Error::BookingNotFound(booking.id))?;
            // Cancelled or swept while the checkout call was in flight.
            if current.status != BookingStatus::Pending {
                warn!(booking_id = %booking.id, "Booking became {} during checkout", current.status);
                return Err(Error::AlreadyTerminal {
                    booking_id: booking.id,
                    status: current.status,
                });
            }
            self.store.update_booking(booking.id, |b| {
                if b.payment_reference.is_none() {
                    b.payment_reference = Some(session.reference.clone());
                }
                b.payment_link = Some(session.url.clone());
            });
        }

        Ok(BookingReceipt {
            booking_id: booking.id,
            payment_url: session.url,
            amount: booking.amount,
        })
    }

    /// Marks a pending booking paid. Repeating the call with the same evidence
    /// succeeds without effect.
    #[instrument(skip(self, evidence))]
    pub async fn confirm_payment(&self, booking_id: Uuid, evidence: PaymentEvidence) -> Result<Confirmation> {
        let handle = self.handle_for_booking(booking_id)?;

        let (booking, show) = {
            let mut show = handle.lock().await;
            let current = self
                .store
                .booking(booking_id)
                .ok_or(Error::BookingNotFound(booking_id))?;
            let now = Utc::now();

            match current.status {
                BookingStatus::Paid => {
                    return if current.payment_reference.as_deref() == Some(evidence.reference.as_str()) {
                        debug!("Duplicate payment confirmation ignored");
                        Ok(Confirmation::AlreadyPaid(current))
                    } else {
                        Err(Error::validation("payment evidence does not match the paid booking"))
                    };
                }
                BookingStatus::Expired | BookingStatus::Cancelled => {
                    flag_refund(&current, &evidence);
                    return Err(Error::AlreadyTerminal {
                        booking_id,
                        status: current.status,
                    });
                }
                BookingStatus::Pending => {}
            }

            if self.is_stale(&current, now) {
                self.transition_locked(&mut show, booking_id, BookingStatus::Expired);
                warn!("Payment arrived after the hold expired");
                flag_refund(&current, &evidence);
                return Err(Error::AlreadyTerminal {
                    booking_id,
                    status: BookingStatus::Expired,
                });
            }
            match &current.payment_reference {
                Some(expected) if *expected == evidence.reference => {}
                Some(_) => {
                    return Err(Error::validation("payment evidence does not match the checkout session"));
                }
                None => {
                    return Err(Error::validation("booking has no checkout session to pay"));
                }
            }

            let booking = self
                .store
                .update_booking(booking_id, |b| {
                    b.status = BookingStatus::Paid;
                    b.paid_at = Some(now);
                    b.payment_reference = Some(evidence.reference.clone());
                })
                .ok_or(Error::BookingNotFound(booking_id))?;
            (booking, show.clone())
        };

        info!("Booking paid");
        self.notify_confirmed(&booking, &show);
        Ok(Confirmation::Confirmed(booking))
    }

    /// Cancels a pending or paid booking and releases its seats.
    #[instrument(skip(self))]
    pub async fn cancel_booking(&self, booking_id: Uuid, reason: &str) -> Result<Booking> {
        self.cancel_from(booking_id, reason, BookingStatus::holds_seats).await
    }

    /// Like [`cancel_booking`](Self::cancel_booking) but leaves paid bookings
    /// alone; used when the payment session lapses.
    #[instrument(skip(self))]
    pub async fn cancel_unpaid(&self, booking_id: Uuid, reason: &str) -> Result<Booking> {
        self.cancel_from(booking_id, reason, |status| !status.is_terminal())
            .await
    }

    async fn cancel_from(
        &self,
        booking_id: Uuid,
        reason: &str,
        allowed: impl Fn(BookingStatus) -> bool,
    ) -> Result<Booking> {
        let handle = self.handle_for_booking(booking_id)?;

        let (booking, movie_id) = {
            let mut show = handle.lock().await;
            let current = self
                .store
                .booking(booking_id)
                .ok_or(Error::BookingNotFound(booking_id))?;
            if !allowed(current.status) {
                return Err(Error::AlreadyTerminal {
                    booking_id,
                    status: current.status,
                });
            }
            let booking = self
                .transition_locked(&mut show, booking_id, BookingStatus::Cancelled)
                .ok_or(Error::BookingNotFound(booking_id))?;
            (booking, show.movie_id)
        };

        info!("Booking cancelled: {}", reason);
        self.notify_cancelled(&booking, movie_id, reason);
        Ok(booking)
    }

    /// Expires every pending booking older than the hold window as of `now`
    /// and returns their ids.
    #[instrument(skip(self))]
    pub async fn expire_stale_pending(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let stale_shows: BTreeSet<Uuid> = self
            .store
            .bookings()
            .into_iter()
            .filter(|b| b.status == BookingStatus::Pending && self.is_stale(b, now))
            .map(|b| b.show_id)
            .collect();

        let mut expired = Vec::new();
        for show_id in stale_shows {
            let Some(handle) = self.store.show_handle(show_id) else {
                continue;
            };
            let mut show = handle.lock().await;
            expired.extend(self.release_stale_locked(&mut show, now));
        }

        if !expired.is_empty() {
            info!("Expired {} stale pending bookings", expired.len());
        }
        expired
    }

    /// Sends one reminder per paid booking whose show starts within the
    /// reminder lead. Returns how many reminders were attempted.
    pub async fn send_show_reminders(&self, now: DateTime<Utc>) -> usize {
        let horizon = now + self.policy.reminder_lead;
        let mut due = Vec::new();

        for candidate in self.store.bookings() {
            if candidate.status != BookingStatus::Paid || candidate.reminder_sent_at.is_some() {
                continue;
            }
            let Some(handle) = self.store.show_handle(candidate.show_id) else {
                continue;
            };
            let show = handle.lock().await;
            if show.starts_at <= now || show.starts_at > horizon {
                continue;
            }
            let marked = self.store.update_booking(candidate.id, |b| {
                if b.status == BookingStatus::Paid && b.reminder_sent_at.is_none() {
                    b.reminder_sent_at = Some(now);
                }
            });
            if marked.is_some_and(|b| b.reminder_sent_at == Some(now)) {
                due.push((candidate, show.starts_at, show.movie_id));
            }
        }

        for (booking, starts_at, movie_id) in &due {
            let content = show_reminder(
                self.notifier.branding(),
                &booking.customer.name,
                &self.movie_title(*movie_id),
                *starts_at,
                self.policy.reminder_lead.num_hours(),
            );
            self.notifier
                .send_best_effort(&booking.customer.email, &content)
                .await;
        }

        if !due.is_empty() {
            info!("Sent {} show reminders", due.len());
        }
        due.len()
    }

    /// Changes the price for future bookings; existing bookings keep theirs.
    pub async fn reprice_show(&self, show_id: Uuid, price: Money) -> Result<Show> {
        if price.cents() == 0 {
            return Err(Error::validation("show price must be greater than zero"));
        }
        let handle = self
            .store
            .show_handle(show_id)
            .ok_or(Error::ShowNotFound(show_id))?;
        let mut show = handle.lock().await;
        show.price = price;
        Ok(show.clone())
    }

    /// A customer's bookings, newest first.
    pub fn bookings_for_user(&self, user_id: &str) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = self
            .store
            .bookings()
            .into_iter()
            .filter(|b| b.user_id == user_id)
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bookings
    }

    pub fn all_bookings(&self) -> Vec<Booking> {
        let mut bookings = self.store.bookings();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bookings
    }

    pub async fn active_shows(&self, now: DateTime<Utc>) -> Vec<ShowOverview> {
        let paid: Vec<Booking> = self
            .store
            .bookings()
            .into_iter()
            .filter(|b| b.status == BookingStatus::Paid)
            .collect();

        self.store
            .upcoming_shows(now)
            .await
            .into_iter()
            .map(|show| ShowOverview {
                movie: self.store.movie(show.movie_id),
                occupied_count: show.occupied_seats.len(),
                earnings: paid
                    .iter()
                    .filter(|b| b.show_id == show.id)
                    .map(|b| b.amount)
                    .sum(),
                show,
            })
            .collect()
    }

    pub async fn dashboard(&self, now: DateTime<Utc>) -> Dashboard {
        let bookings = self.store.bookings();
        let paid: Vec<&Booking> = bookings
            .iter()
            .filter(|b| b.status == BookingStatus::Paid)
            .collect();
        let customers: HashSet<&str> = bookings.iter().map(|b| b.user_id.as_str()).collect();

        Dashboard {
            total_bookings: paid.len(),
            total_revenue: paid.iter().map(|b| b.amount).sum(),
            active_shows: self.active_shows(now).await,
            total_users: customers.len(),
        }
    }

    fn validate_seats(&self, raw: &[String]) -> Result<Vec<SeatId>> {
        if raw.is_empty() {
            return Err(Error::validation("select at least one seat"));
        }
        if raw.len() > self.policy.max_seats_per_booking {
            return Err(Error::validation(format!(
                "at most {} seats can be booked at once",
                self.policy.max_seats_per_booking
            )));
        }

        let mut seen = HashSet::new();
        let mut seats = Vec::with_capacity(raw.len());
        for value in raw {
            let seat: SeatId = value.parse().map_err(Error::Validation)?;
            if !seen.insert(seat.clone()) {
                return Err(Error::validation(format!("seat {} selected twice", seat)));
            }
            seats.push(seat);
        }
        Ok(seats)
    }

    fn is_stale(&self, booking: &Booking, now: DateTime<Utc>) -> bool {
        booking.created_at + self.policy.hold_window <= now
    }

    fn handle_for_booking(&self, booking_id: Uuid) -> Result<crate::store::ShowHandle> {
        let booking = self
            .store
            .booking(booking_id)
            .ok_or(Error::BookingNotFound(booking_id))?;
        self.store
            .show_handle(booking.show_id)
            .ok_or(Error::ShowNotFound(booking.show_id))
    }

    /// Sets a terminal status and frees the booking's seats. Caller holds the
    /// show lock.
    fn transition_locked(&self, show: &mut Show, booking_id: Uuid, status: BookingStatus) -> Option<Booking> {
        let booking = self.store.update_booking(booking_id, |b| b.status = status)?;
        show.occupied_seats.retain(|_, holder| *holder != booking_id);
        Some(booking)
    }

    /// Frees seats of stale pending bookings, and of any holder that is no
    /// longer live. Caller holds the show lock.
    fn release_stale_locked(&self, show: &mut Show, now: DateTime<Utc>) -> Vec<Uuid> {
        let holders: BTreeSet<Uuid> = show.occupied_seats.values().copied().collect();
        let mut expired = Vec::new();

        for holder in holders {
            match self.store.booking(holder) {
                Some(b) if b.status == BookingStatus::Pending && self.is_stale(&b, now) => {
                    self.transition_locked(show, holder, BookingStatus::Expired);
                    debug!(booking_id = %holder, "Hold expired");
                    expired.push(holder);
                }
                Some(b) if b.status.holds_seats() => {}
                _ => show.occupied_seats.retain(|_, h| *h != holder),
            }
        }
        expired
    }

    fn movie_title(&self, movie_id: i64) -> String {
        self.store
            .movie(movie_id)
            .map(|m| m.title)
            .unwrap_or_else(|| format!("Movie #{}", movie_id))
    }

    fn notify_confirmed(&self, booking: &Booking, show: &Show) {
        let title = self.movie_title(show.movie_id);
        let content = booking_confirmed(
            self.notifier.branding(),
            &ConfirmedBooking {
                customer_name: &booking.customer.name,
                movie_title: &title,
                starts_at: show.starts_at,
                seats: &booking.seats,
                amount: booking.amount,
            },
        );
        let notifier = Arc::clone(&self.notifier);
        let to = booking.customer.email.clone();
        tokio::spawn(async move { notifier.send_best_effort(&to, &content).await });
    }

    fn notify_cancelled(&self, booking: &Booking, movie_id: i64, reason: &str) {
        let content = booking_cancelled(
            self.notifier.branding(),
            &booking.customer.name,
            &self.movie_title(movie_id),
            reason,
        );
        let notifier = Arc::clone(&self.notifier);
        let to = booking.customer.email.clone();
        tokio::spawn(async move { notifier.send_best_effort(&to, &content).await });
    }
}

/// A completed session for a booking that no longer holds its seats means the
/// customer was charged for nothing.
fn flag_refund(booking: &Booking, evidence: &PaymentEvidence) -> bool {
    let charged = booking.payment_reference.as_deref() == Some(evidence.reference.as_str());
    if charged {
        error!(
            booking_id = %booking.id,
            reference = %evidence.reference,
            amount = %booking.amount,
            "Payment received after the booking was released, refund required"
        );
    }
    charged
}

fn validate_customer(user_id: &str, customer: &CustomerSnapshot) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(Error::validation("user id is required"));
    }
    if customer.name.trim().is_empty() {
        return Err(Error::validation("customer name is required"));
    }
    if !is_valid_address(&customer.email) {
        return Err(Error::validation(format!(
            "invalid customer email: {:?}",
            customer.email
        )));
    }
    Ok(())
}
