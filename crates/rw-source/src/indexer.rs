//! Stream indexer client.
//!
//! Speaks the Stremio addon stream protocol:
//! `GET {base}/stream/movie/{imdb}.json` and
//! `GET {base}/stream/series/{imdb}:{season}:{episode}.json`.

use std::time::Duration;

use async_trait::async_trait;
use rw_core::{ContentId, SourceHash};
use serde::Deserialize;

use crate::candidate::StreamCandidate;

const PROVIDER: &str = "indexer";

/// What to discover candidates for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery {
    pub content: ContentId,
    /// External catalog id (`tt0133093`) the indexer is keyed by.
    pub imdb_id: String,
}

impl CandidateQuery {
    pub fn path(&self) -> String {
        match self.content {
            ContentId::Movie { .. } => format!("/stream/movie/{}.json", self.imdb_id),
            ContentId::Episode { season, episode, .. } => {
                format!("/stream/series/{}:{season}:{episode}.json", self.imdb_id)
            }
        }
    }
}

/// Anything that can list candidates for a title.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn discover(&self, query: &CandidateQuery) -> rw_core::Result<Vec<StreamCandidate>>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    streams: Vec<AddonStream>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddonStream {
    #[serde(default)]
    name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    info_hash: Option<String>,
    #[serde(default)]
    file_idx: Option<u32>,
    #[serde(default)]
    behavior_hints: BehaviorHints,
}

#[derive(Debug, Default, Deserialize)]
struct BehaviorHints {
    #[serde(default)]
    filename: Option<String>,
}

impl AddonStream {
    /// Streams without a well-formed info-hash (direct links, usenet) are
    /// skipped.
    fn into_candidate(self) -> Option<StreamCandidate> {
        let hash: SourceHash = self.info_hash?.parse().ok()?;
        Some(StreamCandidate::from_description(
            hash,
            Some(&self.name),
            &self.title,
            self.behavior_hints.filename,
            self.file_idx,
        ))
    }
}

/// Parse an addon `streams` response body.
pub fn parse_streams(body: &str) -> rw_core::Result<Vec<StreamCandidate>> {
    let response: StreamsResponse = serde_json::from_str(body)
        .map_err(|e| rw_core::Error::upstream(PROVIDER, format!("invalid streams payload: {e}")))?;
    let mut candidates: Vec<StreamCandidate> = Vec::new();
    for stream in response.streams {
        if let Some(candidate) = stream.into_candidate() {
            // The same swarm can be listed once per file; keep the first.
            if !candidates.iter().any(|c| c.info_hash == candidate.info_hash) {
                candidates.push(candidate);
            }
        }
    }
    Ok(candidates)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AddonIndexer {
    base_url: String,
    http: reqwest::Client,
}

impl AddonIndexer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("reelway/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[async_trait]
impl CandidateSource for AddonIndexer {
    fn name(&self) -> &'static str {
        "addon"
    }

    async fn discover(&self, query: &CandidateQuery) -> rw_core::Result<Vec<StreamCandidate>> {
        let url = format!("{}{}", self.base_url, query.path());
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| rw_core::Error::upstream(PROVIDER, format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(rw_core::Error::upstream(PROVIDER, format!("HTTP {status} for {}", query.path())));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| rw_core::Error::upstream(PROVIDER, format!("failed to read body: {e}")))?;

        let candidates = parse_streams(&body)?;
        tracing::debug!(content = %query.content, count = candidates.len(), "Indexer returned candidates");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "streams": [
            {
                "name": "Torrentio\n1080p",
                "title": "The.Matrix.1999.1080p.BluRay.x264-GROUP\n👤 152 💾 8.74 GB ⚙️ ThePirateBay",
                "infoHash": "0123456789ABCDEF0123456789ABCDEF01234567",
                "fileIdx": 0,
                "behaviorHints": { "bingeGroup": "x", "filename": "The.Matrix.1999.1080p.mkv" }
            },
            {
                "name": "Torrentio\n1080p",
                "title": "duplicate listing",
                "infoHash": "0123456789abcdef0123456789abcdef01234567"
            },
            { "name": "Direct", "title": "no hash", "url": "https://example.com/a.mp4" },
            { "name": "Torrentio\n720p", "title": "Bad hash", "infoHash": "xyz" }
        ]
    }"#;

    #[test]
    fn parses_and_deduplicates() {
        let candidates = parse_streams(BODY).unwrap();
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.info_hash.as_str(), "0123456789abcdef0123456789abcdef01234567");
        assert_eq!(c.seeders, 152);
        assert_eq!(c.filename.as_deref(), Some("The.Matrix.1999.1080p.mkv"));
        assert_eq!(c.file_idx, Some(0));
    }

    #[test]
    fn empty_and_malformed() {
        assert!(parse_streams("{}").unwrap().is_empty());
        assert!(parse_streams("not json").is_err());
    }

    #[test]
    fn query_paths() {
        let movie = CandidateQuery {
            content: ContentId::Movie { tmdb_id: 603 },
            imdb_id: "tt0133093".into(),
        };
        assert_eq!(movie.path(), "/stream/movie/tt0133093.json");
        let episode = CandidateQuery {
            content: ContentId::Episode { tmdb_id: 1399, season: 1, episode: 2 },
            imdb_id: "tt0944947".into(),
        };
        assert_eq!(episode.path(), "/stream/series/tt0944947:1:2.json");
    }

    #[tokio::test]
    async fn discover_fetches_addon_path() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream/movie/tt0133093.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
            .mount(&server)
            .await;

        let indexer = AddonIndexer::new(server.uri(), Duration::from_secs(2));
        let query = CandidateQuery {
            content: ContentId::Movie { tmdb_id: 603 },
            imdb_id: "tt0133093".into(),
        };
        assert_eq!(indexer.discover(&query).await.unwrap().len(), 1);

        let missing = CandidateQuery {
            content: ContentId::Movie { tmdb_id: 1 },
            imdb_id: "tt0000001".into(),
        };
        let err = indexer.discover(&missing).await.unwrap_err();
        assert_eq!(err.code(), "upstream_error");
    }
}
