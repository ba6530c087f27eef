//! TMDB (The Movie Database) lookups.
//!
//! Only what resolution needs: the external catalog id the indexer is keyed
//! by, plus title, year and runtime for ranking when the client did not send
//! them. Rate-limited to stay under TMDB's API limits.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use rw_core::ContentId;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";

const PROVIDER: &str = "tmdb";

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct TmdbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl TmdbClient {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key, timeout)
    }

    pub fn with_base_url(base_url: &str, api_key: String, timeout: Duration) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(30).unwrap_or(NonZeroU32::MIN));
        Self {
            http: reqwest::Client::builder().timeout(timeout).build().unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, extra_params: &[(&str, &str)]) -> rw_core::Result<T> {
        self.limiter.until_ready().await;

        let url = format!("{}{path}", self.base_url);
        let mut params: Vec<(&str, &str)> = vec![("api_key", &self.api_key)];
        params.extend_from_slice(extra_params);

        let resp = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| rw_core::Error::upstream(PROVIDER, format!("request failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(rw_core::Error::not_found("title", path));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(rw_core::Error::upstream(PROVIDER, format!("{status}: {body}")));
        }

        resp.json::<T>()
            .await
            .map_err(|e| rw_core::Error::upstream(PROVIDER, format!("parse error: {e}")))
    }

    /// Title details plus external ids in one request.
    pub async fn details(&self, content: &ContentId) -> rw_core::Result<TitleDetails> {
        let params = [("append_to_response", "external_ids")];
        match content {
            ContentId::Movie { tmdb_id } => {
                let movie: TmdbMovie = self.get(&format!("/movie/{tmdb_id}"), &params).await?;
                Ok(movie.into())
            }
            ContentId::Episode { tmdb_id, .. } => {
                let show: TmdbTvShow = self.get(&format!("/tv/{tmdb_id}"), &params).await?;
                Ok(show.into())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// What resolution needs to know about a title. Cached in the metadata
/// table keyed by content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleDetails {
    pub title: Option<String>,
    pub year: Option<u32>,
    pub runtime_minutes: Option<u32>,
    pub imdb_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalIds {
    #[serde(default)]
    imdb_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbMovie {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    runtime: Option<u32>,
    #[serde(default)]
    imdb_id: Option<String>,
    #[serde(default)]
    external_ids: ExternalIds,
}

#[derive(Debug, Deserialize)]
struct TmdbTvShow {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    first_air_date: Option<String>,
    #[serde(default)]
    episode_run_time: Vec<u32>,
    #[serde(default)]
    external_ids: ExternalIds,
}

fn year_of(date: Option<&str>) -> Option<u32> {
    date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<TmdbMovie> for TitleDetails {
    fn from(movie: TmdbMovie) -> Self {
        Self {
            year: year_of(movie.release_date.as_deref()),
            title: non_empty(movie.title),
            runtime_minutes: movie.runtime.filter(|r| *r > 0),
            imdb_id: non_empty(movie.imdb_id).or_else(|| non_empty(movie.external_ids.imdb_id)),
        }
    }
}

impl From<TmdbTvShow> for TitleDetails {
    fn from(show: TmdbTvShow) -> Self {
        Self {
            year: year_of(show.first_air_date.as_deref()),
            title: non_empty(show.name),
            runtime_minutes: show.episode_run_time.first().copied(),
            imdb_id: non_empty(show.external_ids.imdb_id),
        }
    }
}
