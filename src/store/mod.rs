//! In-process record store.
//!
//! Movies are keyed by their external id, shows and bookings by generated ids.
//! Each show lives behind its own async mutex; that mutex is the only lock
//! seat state is ever mutated under, so different shows never contend.

use crate::models::{Booking, Movie, Show, Subscriber};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub type ShowHandle = Arc<Mutex<Show>>;

#[derive(Default)]
pub struct Store {
    movies: DashMap<i64, Movie>,
    shows: DashMap<Uuid, ShowHandle>,
    bookings: DashMap<Uuid, Booking>,
    subscribers: DashMap<String, Subscriber>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn movie(&self, movie_id: i64) -> Option<Movie> {
        self.movies.get(&movie_id).map(|m| m.value().clone())
    }

    pub fn movies(&self) -> Vec<Movie> {
        self.movies.iter().map(|m| m.value().clone()).collect()
    }

    /// Inserts the movie unless one with the same id exists. Returns the
    /// stored record and whether this call created it.
    pub fn insert_movie_if_absent(&self, movie: Movie) -> (Movie, bool) {
        match self.movies.entry(movie.id) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => (slot.insert(movie).value().clone(), true),
        }
    }

    pub fn set_trailer(&self, movie_id: i64, trailer: String) -> bool {
        match self.movies.get_mut(&movie_id) {
            Some(mut movie) => {
                movie.trailer = Some(trailer);
                true
            }
            None => false,
        }
    }

    pub fn insert_show(&self, show: Show) {
        self.shows.insert(show.id, Arc::new(Mutex::new(show)));
    }

    pub fn show_handle(&self, show_id: Uuid) -> Option<ShowHandle> {
        self.shows.get(&show_id).map(|s| Arc::clone(s.value()))
    }

    pub fn show_handles(&self) -> Vec<ShowHandle> {
        self.shows.iter().map(|s| Arc::clone(s.value())).collect()
    }

    pub async fn show(&self, show_id: Uuid) -> Option<Show> {
        let handle = self.show_handle(show_id)?;
        let show = handle.lock().await;
        Some(show.clone())
    }

    /// Shows starting after `from`, soonest first.
    pub async fn upcoming_shows(&self, from: DateTime<Utc>) -> Vec<Show> {
        let mut shows = Vec::new();
        for handle in self.show_handles() {
            let show = handle.lock().await;
            if show.starts_at >= from {
                shows.push(show.clone());
            }
        }
        shows.sort_by_key(|s| s.starts_at);
        shows
    }

    pub async fn shows_for_movie(&self, movie_id: i64) -> Vec<Show> {
        let mut shows = Vec::new();
        for handle in self.show_handles() {
            let show = handle.lock().await;
            if show.movie_id == movie_id {
                shows.push(show.clone());
            }
        }
        shows.sort_by_key(|s| s.starts_at);
        shows
    }

    pub fn booking(&self, booking_id: Uuid) -> Option<Booking> {
        self.bookings.get(&booking_id).map(|b| b.value().clone())
    }

    pub fn bookings(&self) -> Vec<Booking> {
        self.bookings.iter().map(|b| b.value().clone()).collect()
    }

    /// Writes a booking record. Callers changing a booking's status must hold
    /// the lock of the booking's show.
    pub fn put_booking(&self, booking: Booking) {
        self.bookings.insert(booking.id, booking);
    }

    pub fn update_booking<F>(&self, booking_id: Uuid, update: F) -> Option<Booking>
    where
        F: FnOnce(&mut Booking),
    {
        let mut booking = self.bookings.get_mut(&booking_id)?;
        update(booking.value_mut());
        Some(booking.value().clone())
    }

    pub fn add_subscriber(&self, subscriber: Subscriber) {
        self.subscribers
            .insert(subscriber.email.to_ascii_lowercase(), subscriber);
    }

    pub fn subscribers(&self) -> Vec<Subscriber> {
        self.subscribers.iter().map(|s| s.value().clone()).collect()
    }
}
