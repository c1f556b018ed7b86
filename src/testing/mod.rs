//! Fakes for the outbound collaborators, shared by unit tests.

use crate::models::{Booking, BookingStatus, CastMember, CustomerSnapshot, Genre, Money, Movie, VideoCandidate};
use crate::notify::{Branding, Mailer, NotificationDispatcher, OutgoingEmail, RetryPolicy};
use crate::payment::{CheckoutSession, PaymentGateway};
use crate::tmdb::{MetadataProvider, MovieDetails, MovieSummary};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub fn sample_movie(id: i64, title: &str) -> Movie {
    Movie {
        id,
        title: title.to_string(),
        overview: format!("Overview of {title}"),
        poster_path: Some(format!("/poster-{id}.jpg")),
        backdrop_path: None,
        genres: vec![Genre {
            id: 18,
            name: "Drama".to_string(),
        }],
        casts: Vec::new(),
        release_date: Some("2024-01-01".to_string()),
        original_language: Some("en".to_string()),
        tagline: String::new(),
        vote_average: 7.1,
        vote_count: 100,
        runtime: Some(120),
        trailer: None,
    }
}

pub fn sample_booking(seats: &[&str], price_cents: u64) -> Booking {
    let seats: Vec<_> = seats.iter().map(|s| s.parse().unwrap()).collect();
    Booking {
        id: Uuid::new_v4(),
        user_id: "user-1".to_string(),
        show_id: Uuid::new_v4(),
        amount: Money::from_cents(price_cents).times(seats.len()),
        seats,
        status: BookingStatus::Pending,
        created_at: Utc::now(),
        payment_reference: None,
        payment_link: None,
        paid_at: None,
        reminder_sent_at: None,
        customer: CustomerSnapshot {
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
        },
    }
}

/// Polls `condition` until it holds, panicking after two seconds.
pub async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[derive(Default)]
pub struct FakeMetadata {
    latency_ms: AtomicUsize,
    details: AtomicUsize,
    credits: AtomicUsize,
    videos: AtomicUsize,
    failing_credits: AtomicBool,
    failing_videos: Mutex<HashSet<i64>>,
    video_overrides: Mutex<HashMap<i64, Vec<VideoCandidate>>>,
}

impl FakeMetadata {
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn fail_credits(&self, fail: bool) {
        self.failing_credits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_videos_for(&self, movie_id: i64) {
        self.failing_videos.lock().unwrap().insert(movie_id);
    }

    pub fn set_videos(&self, movie_id: i64, videos: Vec<VideoCandidate>) {
        self.video_overrides.lock().unwrap().insert(movie_id, videos);
    }

    pub fn reset_videos(&self, movie_id: i64) {
        self.video_overrides.lock().unwrap().remove(&movie_id);
    }

    pub fn detail_calls(&self) -> usize {
        self.details.load(Ordering::SeqCst)
    }

    pub fn credit_calls(&self) -> usize {
        self.credits.load(Ordering::SeqCst)
    }

    pub fn video_calls(&self) -> usize {
        self.videos.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let latency = self.latency_ms.load(Ordering::SeqCst) as u64;
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }
}

#[async_trait]
impl MetadataProvider for FakeMetadata {
    async fn now_playing(&self, page: u32) -> Result<Vec<MovieSummary>> {
        let base = i64::from(page) * 100;
        Ok((1..=2)
            .map(|n| MovieSummary {
                id: base + n,
                title: format!("Now playing {}", base + n),
                overview: String::new(),
                poster_path: None,
                backdrop_path: None,
                release_date: None,
                vote_average: 0.0,
                vote_count: 0,
            })
            .collect())
    }

    async fn movie_details(&self, movie_id: i64) -> Result<MovieDetails> {
        self.details.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(MovieDetails {
            id: movie_id,
            title: format!("Movie {movie_id}"),
            overview: format!("Overview {movie_id}"),
            poster_path: Some("/p.jpg".to_string()),
            backdrop_path: Some("/b.jpg".to_string()),
            genres: vec![Genre {
                id: 28,
                name: "Action".to_string(),
            }],
            release_date: Some("2024-05-01".to_string()),
            original_language: Some("en".to_string()),
            tagline: None,
            vote_average: 8.0,
            vote_count: 10,
            runtime: Some(110),
        })
    }

    async fn movie_credits(&self, _movie_id: i64) -> Result<Vec<CastMember>> {
        self.credits.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.failing_credits.load(Ordering::SeqCst) {
            return Err(anyhow!("HTTP request failed: 503 Service Unavailable"));
        }
        Ok(["Lead", "Support"]
            .iter()
            .map(|name| CastMember {
                name: name.to_string(),
                character: None,
                profile_path: None,
            })
            .collect())
    }

    async fn movie_videos(&self, movie_id: i64) -> Result<Vec<VideoCandidate>> {
        self.videos.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.failing_videos.lock().unwrap().contains(&movie_id) {
            return Err(anyhow!("HTTP request failed: 429 Too Many Requests"));
        }
        if let Some(videos) = self.video_overrides.lock().unwrap().get(&movie_id) {
            return Ok(videos.clone());
        }
        Ok(vec![
            VideoCandidate {
                key: format!("teaser-{movie_id}"),
                site: "YouTube".to_string(),
                kind: "Teaser".to_string(),
                official: true,
            },
            VideoCandidate {
                key: format!("official-{movie_id}"),
                site: "YouTube".to_string(),
                kind: "Trailer".to_string(),
                official: true,
            },
        ])
    }
}

#[derive(Default)]
pub struct FakePayments {
    latency_ms: AtomicUsize,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakePayments {
    pub fn fail(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakePayments {
    async fn create_checkout(&self, booking: &Booking, _movie_title: &str) -> Result<CheckoutSession> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst) as u64;
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("payment provider timed out"));
        }
        Ok(CheckoutSession {
            reference: format!("cs_{}", booking.id.simple()),
            url: format!("https://checkout.example/pay/{}", booking.id),
        })
    }
}

/// Records delivered mail; can be told to fail the next N attempts per recipient.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    failures: Mutex<HashMap<String, u32>>,
    attempts: AtomicUsize,
}

impl RecordingMailer {
    pub fn fail_next(&self, to: &str, times: u32) {
        self.failures.lock().unwrap().insert(to.to_string(), times);
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, to: &str) -> Vec<OutgoingEmail> {
        self.sent().into_iter().filter(|e| e.to == to).collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&email.to) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(anyhow!("connection refused"));
                }
            }
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(format!("<{}@test>", Uuid::new_v4()))
    }
}

pub fn recording_dispatcher(mailer: Arc<RecordingMailer>) -> Arc<NotificationDispatcher> {
    Arc::new(NotificationDispatcher::new(
        mailer,
        RetryPolicy::new(3, Duration::from_millis(1)),
        Branding::default(),
        100,
    ))
}
