//! Movie and showtime ingestion.
//!
//! Movies are fetched from the metadata provider at most once per external
//! id: concurrent requests for the same id queue behind a per-id lock and the
//! store insert is first-writer-wins. Show scheduling is serialized per movie
//! so the same instant is never scheduled twice.

pub mod trailer;

use crate::error::{Error, Result};
use crate::models::{Money, Movie, Show};
use crate::notify::templates::new_show_announcement;
use crate::notify::{EmailRequest, NotificationDispatcher};
use crate::store::Store;
use crate::tmdb::{MetadataProvider, MovieSummary};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub use trailer::select_trailer;

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub now_playing_pages: u32,
    pub trailer_refresh_delay: Duration,
    pub announcement_delay: Duration,
    /// Offset operator-entered slots are interpreted in.
    pub offset: FixedOffset,
}

/// Operator input: one date with any number of start times.
#[derive(Debug, Clone, Deserialize)]
pub struct SlotInput {
    pub date: String,
    pub time: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ShowSlot {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl ShowSlot {
    fn instant(&self, offset: &FixedOffset) -> Result<DateTime<Utc>> {
        offset
            .from_local_datetime(&self.date.and_time(self.time))
            .single()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| Error::validation(format!("ambiguous slot {} {}", self.date, self.time)))
    }
}

/// Parses operator slots; any malformed date or time rejects the whole set.
pub fn parse_slots(inputs: &[SlotInput]) -> Result<Vec<ShowSlot>> {
    let mut slots = Vec::new();
    for input in inputs {
        let date = NaiveDate::parse_from_str(input.date.trim(), "%Y-%m-%d")
            .map_err(|_| Error::validation(format!("invalid show date: {:?}", input.date)))?;
        for raw in &input.time {
            let raw = raw.trim();
            let time = NaiveTime::parse_from_str(raw, "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
                .map_err(|_| Error::validation(format!("invalid show time: {:?}", raw)))?;
            slots.push(ShowSlot { date, time });
        }
    }
    Ok(slots)
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowTime {
    pub time: DateTime<Utc>,
    #[serde(rename = "showId")]
    pub show_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct MovieSchedule {
    pub movie: Movie,
    /// Local calendar date (`YYYY-MM-DD`) to the shows starting that day.
    #[serde(rename = "dateTime")]
    pub date_time: BTreeMap<String, Vec<ShowTime>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrailerRefresh {
    Updated(String),
    NotFound,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TrailerRefreshSummary {
    pub total: usize,
    pub updated: usize,
    #[serde(rename = "noTrailer")]
    pub no_trailer: usize,
    pub failed: usize,
}

/// One async lock per key. Entries live only while someone holds or waits
/// on them.
#[derive(Default)]
struct KeyedLocks {
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    async fn lock(&self, key: i64) -> KeyedGuard<'_> {
        let lock = Arc::clone(self.locks.entry(key).or_default().value());
        KeyedGuard {
            owner: self,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct KeyedGuard<'a> {
    owner: &'a KeyedLocks,
    key: i64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own reference left means nobody is waiting.
        self.owner
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct CatalogIngestor {
    provider: Arc<dyn MetadataProvider>,
    store: Arc<Store>,
    notifier: Arc<NotificationDispatcher>,
    settings: CatalogSettings,
    fetch_locks: KeyedLocks,
    schedule_locks: KeyedLocks,
}

impl CatalogIngestor {
    pub fn new(
        provider: Arc<dyn MetadataProvider>,
        store: Arc<Store>,
        notifier: Arc<NotificationDispatcher>,
        settings: CatalogSettings,
    ) -> Self {
        Self {
            provider,
            store,
            notifier,
            settings,
            fetch_locks: KeyedLocks::default(),
            schedule_locks: KeyedLocks::default(),
        }
    }

    /// Candidate movies for the admin picker.
    #[instrument(skip(self))]
    pub async fn now_playing(&self) -> Result<Vec<MovieSummary>> {
        let mut pages = JoinSet::new();
        for page in 1..=self.settings.now_playing_pages {
            let provider = Arc::clone(&self.provider);
            pages.spawn(async move { (page, provider.now_playing(page).await) });
        }

        let mut fetched = Vec::new();
        while let Some(joined) = pages.join_next().await {
            let (page, result) = joined.map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
            fetched.push((page, result.map_err(Error::upstream)?));
        }
        fetched.sort_by_key(|(page, _)| *page);

        Ok(fetched.into_iter().flat_map(|(_, movies)| movies).collect())
    }

    /// Returns the local movie, fetching and persisting it on first use.
    #[instrument(skip(self))]
    pub async fn ensure_movie(&self, external_id: i64) -> Result<Movie> {
        if let Some(movie) = self.store.movie(external_id) {
            return Ok(movie);
        }

        let _guard = self.fetch_locks.lock(external_id).await;
        if let Some(movie) = self.store.movie(external_id) {
            debug!("Movie {} was ingested while waiting", external_id);
            return Ok(movie);
        }

        let (details, casts, videos) = tokio::try_join!(
            self.provider.movie_details(external_id),
            self.provider.movie_credits(external_id),
            self.provider.movie_videos(external_id),
        )
        .map_err(Error::upstream)?;

        let trailer = select_trailer(&videos).map(|v| v.key.clone());
        let movie = Movie {
            id: external_id,
            title: details.title,
            overview: details.overview,
            poster_path: details.poster_path,
            backdrop_path: details.backdrop_path,
            genres: details.genres,
            casts,
            release_date: details.release_date,
            original_language: details.original_language,
            tagline: details.tagline.unwrap_or_default(),
            vote_average: details.vote_average,
            vote_count: details.vote_count,
            runtime: details.runtime,
            trailer,
        };

        let (stored, created) = self.store.insert_movie_if_absent(movie);
        if created {
            info!(
                "Movie created: {}, trailer: {}",
                stored.title,
                stored.trailer.as_deref().unwrap_or("none")
            );
        }
        Ok(stored)
    }

    /// Creates one show per distinct slot. Slots already scheduled for the
    /// movie are skipped. Subscribers are told about new shows in the background.
    #[instrument(skip(self, slots))]
    pub async fn schedule_shows(&self, movie_id: i64, slots: &[ShowSlot], price: Money) -> Result<Vec<Show>> {
        let instants = self.validate_schedule(slots, price)?;
        let movie = self
            .store
            .movie(movie_id)
            .ok_or(Error::MovieNotFound(movie_id))?;

        let guard = self.schedule_locks.lock(movie_id).await;
        let existing: HashSet<DateTime<Utc>> = self
            .store
            .shows_for_movie(movie_id)
            .await
            .into_iter()
            .map(|s| s.starts_at)
            .collect();

        let mut created = Vec::new();
        for starts_at in instants {
            if existing.contains(&starts_at) {
                debug!("Show for movie {} at {} already exists, skipping", movie_id, starts_at);
                continue;
            }
            let show = Show::new(movie_id, starts_at, price);
            self.store.insert_show(show.clone());
            created.push(show);
        }
        drop(guard);

        info!("Scheduled {} shows for {}", created.len(), movie.title);
        if !created.is_empty() {
            self.announce(&movie);
        }
        Ok(created)
    }

    /// Operator workflow: validates input before touching the provider so a
    /// bad request never leaves a movie behind without its shows.
    pub async fn add_shows(&self, external_id: i64, inputs: &[SlotInput], price: f64) -> Result<(Movie, Vec<Show>)> {
        let slots = parse_slots(inputs)?;
        let price = Money::from_major(price)
            .ok_or_else(|| Error::validation("show price must be greater than zero"))?;
        self.validate_schedule(&slots, price)?;

        let movie = self.ensure_movie(external_id).await?;
        let shows = self.schedule_shows(movie.id, &slots, price).await?;
        Ok((movie, shows))
    }

    fn validate_schedule(&self, slots: &[ShowSlot], price: Money) -> Result<BTreeSet<DateTime<Utc>>> {
        if slots.is_empty() {
            return Err(Error::validation("at least one show slot is required"));
        }
        if price.cents() == 0 {
            return Err(Error::validation("show price must be greater than zero"));
        }
        slots
            .iter()
            .map(|slot| slot.instant(&self.settings.offset))
            .collect()
    }

    fn announce(&self, movie: &Movie) {
        let subscribers = self.store.subscribers();
        if subscribers.is_empty() {
            debug!("No subscribers to announce {} to", movie.title);
            return;
        }

        let messages: Vec<EmailRequest> = subscribers
            .iter()
            .map(|s| {
                let content = new_show_announcement(
                    self.notifier.branding(),
                    &s.name,
                    &movie.title,
                    &movie.overview,
                );
                EmailRequest::branded(s.email.clone(), content)
            })
            .collect();

        let notifier = Arc::clone(&self.notifier);
        let delay = self.settings.announcement_delay;
        let title = movie.title.clone();
        tokio::spawn(async move {
            let summary = notifier.send_bulk(messages, delay).await;
            if summary.failed > 0 {
                warn!(
                    "New show announcement for {}: {} of {} emails failed",
                    title, summary.failed, summary.total
                );
            }
        });
    }

    /// Distinct movies with at least one future show, soonest first.
    pub async fn upcoming_movies(&self, now: DateTime<Utc>) -> Vec<Movie> {
        let mut seen = HashSet::new();
        self.store
            .upcoming_shows(now)
            .await
            .into_iter()
            .filter(|show| seen.insert(show.movie_id))
            .filter_map(|show| self.store.movie(show.movie_id))
            .collect()
    }

    pub async fn movie_schedule(&self, movie_id: i64, now: DateTime<Utc>) -> Result<MovieSchedule> {
        let movie = self
            .store
            .movie(movie_id)
            .ok_or(Error::MovieNotFound(movie_id))?;

        let mut date_time: BTreeMap<String, Vec<ShowTime>> = BTreeMap::new();
        for show in self.store.shows_for_movie(movie_id).await {
            if show.starts_at < now {
                continue;
            }
            let date = show
                .starts_at
                .with_timezone(&self.settings.offset)
                .format("%Y-%m-%d")
                .to_string();
            date_time.entry(date).or_default().push(ShowTime {
                time: show.starts_at,
                show_id: show.id,
            });
        }

        Ok(MovieSchedule { movie, date_time })
    }

    /// Re-runs trailer selection for one stored movie.
    #[instrument(skip(self))]
    pub async fn refresh_trailer(&self, movie_id: i64) -> Result<TrailerRefresh> {
        if self.store.movie(movie_id).is_none() {
            return Err(Error::MovieNotFound(movie_id));
        }

        let videos = self
            .provider
            .movie_videos(movie_id)
            .await
            .map_err(Error::upstream)?;
        debug!("Found {} videos for movie {}", videos.len(), movie_id);

        match select_trailer(&videos) {
            Some(trailer) => {
                self.store.set_trailer(movie_id, trailer.key.clone());
                info!("Trailer updated for movie {}: {}", movie_id, trailer.key);
                Ok(TrailerRefresh::Updated(trailer.key.clone()))
            }
            None => {
                info!("No trailer found for movie {}", movie_id);
                Ok(TrailerRefresh::NotFound)
            }
        }
    }

    /// Backfills trailers for every stored movie, pausing between upstream
    /// calls. Individual failures are counted, not propagated.
    pub async fn refresh_all_trailers(&self) -> TrailerRefreshSummary {
        let movies = self.store.movies();
        let mut summary = TrailerRefreshSummary {
            total: movies.len(),
            ..Default::default()
        };
        info!("Starting trailer update for {} movies", summary.total);

        for (index, movie) in movies.iter().enumerate() {
            match self.refresh_trailer(movie.id).await {
                Ok(TrailerRefresh::Updated(_)) => summary.updated += 1,
                Ok(TrailerRefresh::NotFound) => summary.no_trailer += 1,
                Err(e) => {
                    error!("Failed to update trailer for {} ({}): {}", movie.id, movie.title, e);
                    summary.failed += 1;
                }
            }

            if index + 1 < movies.len() {
                sleep(self.settings.trailer_refresh_delay).await;
            }
        }

        info!(
            "Trailer update finished: {} updated, {} without trailer, {} failed",
            summary.updated, summary.no_trailer, summary.failed
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Subscriber;
    use crate::testing::{recording_dispatcher, wait_for, FakeMetadata, RecordingMailer};
    use assert_matches::assert_matches;
    use chrono::Duration as ChronoDuration;

    struct Harness {
        catalog: Arc<CatalogIngestor>,
        provider: Arc<FakeMetadata>,
        store: Arc<Store>,
        mailer: Arc<RecordingMailer>,
    }

    fn harness(offset_minutes: i32) -> Harness {
        let provider = Arc::new(FakeMetadata::default());
        let store = Arc::new(Store::new());
        let mailer = Arc::new(RecordingMailer::default());
        let catalog = Arc::new(CatalogIngestor::new(
            provider.clone(),
            store.clone(),
            recording_dispatcher(mailer.clone()),
            CatalogSettings {
                now_playing_pages: 3,
                trailer_refresh_delay: Duration::from_millis(1),
                announcement_delay: Duration::ZERO,
                offset: FixedOffset::east_opt(offset_minutes * 60).unwrap(),
            },
        ));
        Harness {
            catalog,
            provider,
            store,
            mailer,
        }
    }

    fn tomorrow() -> String {
        (Utc::now() + ChronoDuration::days(1))
            .format("%Y-%m-%d")
            .to_string()
    }

    fn slots(date: &str, times: &[&str]) -> Vec<SlotInput> {
        vec![SlotInput {
            date: date.to_string(),
            time: times.iter().map(|t| t.to_string()).collect(),
        }]
    }

    #[tokio::test]
    async fn ensure_movie_fetches_once_under_concurrency() {
        let h = harness(0);
        h.provider.set_latency(Duration::from_millis(20));

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let catalog = Arc::clone(&h.catalog);
            tasks.spawn(async move { catalog.ensure_movie(42).await });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().unwrap().id, 42);
        }

        assert_eq!(h.store.movies().len(), 1);
        assert_eq!(h.provider.detail_calls(), 1);
        assert_eq!(h.provider.credit_calls(), 1);
        assert_eq!(h.provider.video_calls(), 1);
        assert_eq!(h.catalog.fetch_locks.len(), 0);
    }

    #[tokio::test]
    async fn per_key_locks_are_dropped_once_released() {
        let h = harness(0);
        for id in 1..=20 {
            h.catalog.ensure_movie(id).await.unwrap();
        }
        h.provider.fail_credits(true);
        assert!(h.catalog.ensure_movie(99).await.is_err());
        assert_eq!(h.catalog.fetch_locks.len(), 0);

        let held = h.catalog.schedule_locks.lock(5).await;
        let catalog = Arc::clone(&h.catalog);
        let waiter = tokio::spawn(async move {
            let _next = catalog.schedule_locks.lock(5).await;
        });
        wait_for(|| Arc::strong_count(h.catalog.schedule_locks.locks.get(&5).unwrap().value()) == 3).await;
        drop(held);
        assert_eq!(h.catalog.schedule_locks.len(), 1);
        waiter.await.unwrap();
        assert_eq!(h.catalog.schedule_locks.len(), 0);
    }

    #[tokio::test]
    async fn ensure_movie_stores_selected_trailer_and_cast() {
        let h = harness(0);
        let movie = h.catalog.ensure_movie(7).await.unwrap();
        assert_eq!(movie.trailer.as_deref(), Some("official-7"));
        assert_eq!(movie.casts.len(), 2);
        assert_eq!(movie.title, "Movie 7");

        // Second call is served locally.
        h.catalog.ensure_movie(7).await.unwrap();
        assert_eq!(h.provider.detail_calls(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_persists_nothing() {
        let h = harness(0);
        h.provider.fail_credits(true);

        let result = h.catalog.ensure_movie(9).await;
        assert_matches!(result, Err(Error::UpstreamUnavailable(_)));
        assert!(h.store.movie(9).is_none());

        h.provider.fail_credits(false);
        assert!(h.catalog.ensure_movie(9).await.is_ok());
    }

    #[tokio::test]
    async fn add_shows_collapses_duplicate_slots() {
        let h = harness(0);
        let date = tomorrow();
        let mut inputs = slots(&date, &["10:00", "13:30", "10:00"]);
        inputs.extend(slots(&date, &["13:30:00"]));

        let (movie, shows) = h.catalog.add_shows(42, &inputs, 10.0).await.unwrap();
        assert_eq!(movie.id, 42);
        assert_eq!(shows.len(), 2);
        assert!(shows.iter().all(|s| s.price == Money::from_cents(1000)));
        assert!(shows.iter().all(|s| s.occupied_seats.is_empty()));

        // Re-adding the same slot creates nothing new.
        let (_, again) = h.catalog.add_shows(42, &slots(&date, &["10:00"]), 10.0).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(h.store.shows_for_movie(42).await.len(), 2);
    }

    #[tokio::test]
    async fn invalid_requests_create_nothing() {
        let h = harness(0);
        let date = tomorrow();

        assert_matches!(h.catalog.add_shows(42, &[], 10.0).await, Err(Error::Validation(_)));
        assert_matches!(
            h.catalog.add_shows(42, &slots(&date, &["10:00"]), 0.0).await,
            Err(Error::Validation(_))
        );
        assert_matches!(
            h.catalog.add_shows(42, &slots(&date, &["25:99"]), 10.0).await,
            Err(Error::Validation(_))
        );
        assert_matches!(
            h.catalog.add_shows(42, &slots("tomorrow", &["10:00"]), 10.0).await,
            Err(Error::Validation(_))
        );

        assert!(h.store.movies().is_empty());
        assert_eq!(h.provider.detail_calls(), 0);
    }

    #[tokio::test]
    async fn schedule_requires_known_movie() {
        let h = harness(0);
        let slot = parse_slots(&slots(&tomorrow(), &["10:00"])).unwrap();
        assert_matches!(
            h.catalog.schedule_shows(5, &slot, Money::from_cents(500)).await,
            Err(Error::MovieNotFound(5))
        );
    }

    #[tokio::test]
    async fn slots_are_read_in_configured_offset() {
        let h = harness(330);
        let inputs = slots("2031-03-10", &["09:00"]);
        let (_, shows) = h.catalog.add_shows(42, &inputs, 8.5).await.unwrap();
        assert_eq!(
            shows[0].starts_at,
            Utc.with_ymd_and_hms(2031, 3, 10, 3, 30, 0).unwrap()
        );

        let schedule = h.catalog.movie_schedule(42, Utc::now()).await.unwrap();
        assert_eq!(schedule.date_time["2031-03-10"].len(), 1);
    }

    #[tokio::test]
    async fn new_shows_are_announced_to_subscribers() {
        let h = harness(0);
        h.store.add_subscriber(Subscriber {
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
        });
        h.store.add_subscriber(Subscriber {
            name: "Bo".to_string(),
            email: "bo@example.com".to_string(),
        });

        h.catalog
            .add_shows(42, &slots(&tomorrow(), &["18:00"]), 12.0)
            .await
            .unwrap();

        wait_for(|| h.mailer.sent().len() == 2).await;
        assert!(h.mailer.sent()[0].subject.contains("New Show Added: Movie 42"));
    }

    #[tokio::test]
    async fn announcement_failure_keeps_created_shows() {
        let h = harness(0);
        h.store.add_subscriber(Subscriber {
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
        });
        h.mailer.fail_next("ana@example.com", 10);

        let (_, shows) = h
            .catalog
            .add_shows(42, &slots(&tomorrow(), &["18:00"]), 12.0)
            .await
            .unwrap();
        assert_eq!(shows.len(), 1);
        wait_for(|| h.mailer.attempts() == 3).await;
        assert_eq!(h.store.shows_for_movie(42).await.len(), 1);
    }

    #[tokio::test]
    async fn upcoming_movies_lists_each_movie_once() {
        let h = harness(0);
        let date = tomorrow();
        h.catalog.add_shows(1, &slots(&date, &["20:00"]), 9.0).await.unwrap();
        h.catalog.add_shows(2, &slots(&date, &["10:00", "22:00"]), 9.0).await.unwrap();

        let movies = h.catalog.upcoming_movies(Utc::now()).await;
        let ids: Vec<i64> = movies.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn movie_schedule_groups_future_shows_by_date() {
        let h = harness(0);
        let date = tomorrow();
        h.catalog
            .add_shows(3, &slots(&date, &["10:00", "19:00"]), 9.0)
            .await
            .unwrap();

        let schedule = h.catalog.movie_schedule(3, Utc::now()).await.unwrap();
        assert_eq!(schedule.date_time.len(), 1);
        assert_eq!(schedule.date_time[&date].len(), 2);
        assert_matches!(
            h.catalog.movie_schedule(99, Utc::now()).await,
            Err(Error::MovieNotFound(99))
        );
    }

    #[tokio::test]
    async fn now_playing_concatenates_pages_in_order() {
        let h = harness(0);
        let movies = h.catalog.now_playing().await.unwrap();
        let ids: Vec<i64> = movies.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![101, 102, 201, 202, 301, 302]);
    }

    #[tokio::test]
    async fn refresh_all_trailers_reports_summary() {
        let h = harness(0);
        for id in [1, 2, 3] {
            h.catalog.ensure_movie(id).await.unwrap();
        }
        h.provider.set_videos(2, vec![]);
        h.provider.fail_videos_for(3);

        let summary = h.catalog.refresh_all_trailers().await;
        assert_eq!(
            summary,
            TrailerRefreshSummary {
                total: 3,
                updated: 1,
                no_trailer: 1,
                failed: 1,
            }
        );
        assert_eq!(h.store.movie(1).unwrap().trailer.as_deref(), Some("official-1"));
    }

    #[tokio::test]
    async fn refresh_trailer_backfills_missing_trailer() {
        let h = harness(0);
        h.provider.set_videos(5, vec![]);
        let movie = h.catalog.ensure_movie(5).await.unwrap();
        assert!(movie.trailer.is_none());

        h.provider.reset_videos(5);
        let outcome = h.catalog.refresh_trailer(5).await.unwrap();
        assert_eq!(outcome, TrailerRefresh::Updated("official-5".to_string()));
        assert_eq!(h.store.movie(5).unwrap().trailer.as_deref(), Some("official-5"));
        assert_matches!(h.catalog.refresh_trailer(404).await, Err(Error::MovieNotFound(404)));
    }
}
