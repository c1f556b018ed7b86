use crate::config::TmdbConfig;
use crate::http::HttpClient;
use crate::models::{CastMember, Genre, VideoCandidate};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";

/// Remote movie catalog consumed by the ingestor.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn now_playing(&self, page: u32) -> Result<Vec<MovieSummary>>;
    async fn movie_details(&self, movie_id: i64) -> Result<MovieDetails>;
    async fn movie_credits(&self, movie_id: i64) -> Result<Vec<CastMember>>;
    async fn movie_videos(&self, movie_id: i64) -> Result<Vec<VideoCandidate>>;
}

/// Entry of the now-playing listing, passed through to the admin UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieSummary {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub overview: String,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub release_date: Option<String>,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub vote_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MovieDetails {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub overview: String,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    pub release_date: Option<String>,
    pub original_language: Option<String>,
    pub tagline: Option<String>,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub vote_count: u64,
    pub runtime: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Paged<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Credits {
    #[serde(default)]
    cast: Vec<RawCastMember>,
}

#[derive(Debug, Deserialize)]
struct RawCastMember {
    name: String,
    character: Option<String>,
    profile_path: Option<String>,
}

pub struct TmdbClient {
    http: HttpClient,
    config: TmdbConfig,
}

impl TmdbClient {
    pub fn new(http: HttpClient, config: TmdbConfig) -> Self {
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        format!("{}{}", base, path)
    }
}

#[async_trait]
impl MetadataProvider for TmdbClient {
    #[instrument(skip(self))]
    async fn now_playing(&self, page: u32) -> Result<Vec<MovieSummary>> {
        let url = self.url(&format!("/movie/now_playing?page={}", page));
        let listing: Paged<MovieSummary> = self
            .http
            .get_json_bearer(&url, &self.config.api_key)
            .await
            .with_context(|| format!("fetching now playing page {}", page))?;

        info!("Fetched {} now playing movies from page {}", listing.results.len(), page);
        Ok(listing.results)
    }

    #[instrument(skip(self))]
    async fn movie_details(&self, movie_id: i64) -> Result<MovieDetails> {
        let url = self.url(&format!("/movie/{}", movie_id));
        self.http
            .get_json_bearer(&url, &self.config.api_key)
            .await
            .with_context(|| format!("fetching details for movie {}", movie_id))
    }

    #[instrument(skip(self))]
    async fn movie_credits(&self, movie_id: i64) -> Result<Vec<CastMember>> {
        let url = self.url(&format!("/movie/{}/credits", movie_id));
        let credits: Credits = self
            .http
            .get_json_bearer(&url, &self.config.api_key)
            .await
            .with_context(|| format!("fetching credits for movie {}", movie_id))?;

        Ok(credits
            .cast
            .into_iter()
            .map(|c| CastMember {
                name: c.name,
                character: c.character,
                profile_path: c.profile_path,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn movie_videos(&self, movie_id: i64) -> Result<Vec<VideoCandidate>> {
        let url = self.url(&format!(
            "/movie/{}/videos?language={}",
            movie_id,
            urlencoding::encode("en-US")
        ));
        let videos: Paged<VideoCandidate> = self
            .http
            .get_json_bearer(&url, &self.config.api_key)
            .await
            .with_context(|| format!("fetching videos for movie {}", movie_id))?;

        Ok(videos.results)
    }
}
