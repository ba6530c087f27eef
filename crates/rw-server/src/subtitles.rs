//! Subtitle pipeline.
//!
//! Embedded text tracks are extracted to WebVTT with ffmpeg; external tracks
//! come from an OpenSubtitles-style provider and are normalized to WebVTT.
//! Both kinds are cached on disk and the work for one file is shared by
//! concurrent requests.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use rw_av::captions::{extract_subtitle, to_webvtt};
use rw_av::{SubtitleStream, ToolRegistry, EXTERNAL_SUBTITLE_BASE};
use rw_core::{normalize_lang, same_lang, ContentId, Error, Result};
use serde::Deserialize;

use crate::cache::digest_name;
use crate::resolve::SingleFlight;

pub const DEFAULT_BASE_URL: &str = "https://api.opensubtitles.com/api/v1";

const PROVIDER: &str = "opensubtitles";

/// Prefix of provider references handed to clients in place of a URL; the
/// real download link is requested only when the track is fetched.
pub const PROVIDER_REF_PREFIX: &str = "opensubtitles:";

/// External tracks offered per resolution.
const MAX_EXTERNAL_TRACKS: usize = 5;

// ---------------------------------------------------------------------------
// Provider client
// ---------------------------------------------------------------------------

/// One search hit, flattened from the provider's nested shape.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleHit {
    pub file_id: u64,
    pub language: String,
    pub download_count: u64,
    pub rating: f64,
    pub release: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    attributes: SearchAttributes,
}

#[derive(Debug, Deserialize)]
struct SearchAttributes {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    download_count: u64,
    #[serde(default)]
    ratings: f64,
    #[serde(default)]
    release: Option<String>,
    #[serde(default)]
    files: Vec<SearchFile>,
}

#[derive(Debug, Deserialize)]
struct SearchFile {
    file_id: u64,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    link: String,
}

pub struct OpenSubtitlesClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl OpenSubtitlesClient {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(5).unwrap_or(NonZeroU32::MIN));
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(concat!("reelway v", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Subtitles for a title in one language.
    pub async fn search(&self, imdb_id: &str, content: &ContentId, lang: &str) -> Result<Vec<SubtitleHit>> {
        self.limiter.until_ready().await;

        let numeric = imdb_id.trim_start_matches("tt").trim_start_matches('0').to_string();
        let lang = normalize_lang(lang);
        let mut params: Vec<(&str, String)> = vec![("languages", lang)];
        match content.episode() {
            Some((season, episode)) => {
                params.push(("parent_imdb_id", numeric));
                params.push(("season_number", season.to_string()));
                params.push(("episode_number", episode.to_string()));
            }
            None => params.push(("imdb_id", numeric)),
        }

        let resp = self
            .http
            .get(format!("{}/subtitles", self.base_url))
            .header("Api-Key", &self.api_key)
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::upstream(PROVIDER, format!("search failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::upstream(PROVIDER, format!("search returned {}", resp.status())));
        }
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::upstream(PROVIDER, format!("bad search response: {e}")))?;

        Ok(body
            .data
            .into_iter()
            .flat_map(|item| {
                let attrs = item.attributes;
                attrs
                    .files
                    .into_iter()
                    .map(move |file| SubtitleHit {
                        file_id: file.file_id,
                        language: attrs.language.clone().unwrap_or_default(),
                        download_count: attrs.download_count,
                        rating: attrs.ratings,
                        release: attrs.release.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    /// Exchange a file id for a short-lived download link.
    pub async fn download_link(&self, file_id: u64) -> Result<String> {
        self.limiter.until_ready().await;
        let resp = self
            .http
            .post(format!("{}/download", self.base_url))
            .header("Api-Key", &self.api_key)
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await
            .map_err(|e| Error::upstream(PROVIDER, format!("download request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::upstream(PROVIDER, format!("download returned {}", resp.status())));
        }
        let body: DownloadResponse = resp
            .json()
            .await
            .map_err(|e| Error::upstream(PROVIDER, format!("bad download response: {e}")))?;
        Ok(body.link)
    }
}

/// Deduplicate by file id, then order by language match, downloads and
/// rating.
pub fn rank_hits(mut hits: Vec<SubtitleHit>, lang: &str) -> Vec<SubtitleHit> {
    let mut seen = std::collections::HashSet::new();
    hits.retain(|h| seen.insert(h.file_id));
    hits.sort_by(|a, b| {
        let a_lang = same_lang(&a.language, lang);
        let b_lang = same_lang(&b.language, lang);
        b_lang
            .cmp(&a_lang)
            .then(b.download_count.cmp(&a.download_count))
            .then(b.rating.total_cmp(&a.rating))
    });
    hits
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct SubtitleService {
    tools: Arc<ToolRegistry>,
    client: Option<OpenSubtitlesClient>,
    http: reqwest::Client,
    dir: PathBuf,
    ttl: Duration,
    flights: SingleFlight<PathBuf>,
}

impl SubtitleService {
    pub fn new(
        tools: Arc<ToolRegistry>,
        client: Option<OpenSubtitlesClient>,
        cache_dir: &Path,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            tools,
            client,
            http: reqwest::Client::builder().timeout(timeout).build().unwrap_or_default(),
            dir: cache_dir.join("subtitles"),
            ttl,
            flights: SingleFlight::new(),
        }
    }

    pub fn has_provider(&self) -> bool {
        self.client.is_some()
    }

    fn is_fresh(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .is_some_and(|age| age < self.ttl)
    }

    /// WebVTT file for an embedded subtitle stream.
    pub async fn internal_vtt(&self, input: &str, stream_index: u32) -> Result<PathBuf> {
        let path = self
            .dir
            .join("internal")
            .join(digest_name(&[input, &stream_index.to_string()], "vtt"));
        if self.is_fresh(&path) {
            return Ok(path);
        }

        let ffmpeg = self.tools.require("ffmpeg")?.path.clone();
        let input = input.to_string();
        let key = path.to_string_lossy().to_string();
        self.flights
            .run(&key, move || async move {
                let part = path.with_extension("vtt.part");
                extract_subtitle(&ffmpeg, &input, stream_index, &part).await?;
                tokio::fs::rename(&part, &path).await?;
                Ok(path)
            })
            .await
    }

    /// WebVTT file for an external track, given as an http(s) URL or a
    /// provider reference.
    pub async fn external_vtt(&self, reference: &str) -> Result<PathBuf> {
        let path = self.dir.join("external").join(digest_name(&[reference], "vtt"));
        if self.is_fresh(&path) {
            return Ok(path);
        }

        let url = self.download_url(reference).await?;
        let http = self.http.clone();
        let key = path.to_string_lossy().to_string();
        self.flights
            .run(&key, move || async move {
                let resp = http
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| Error::upstream(PROVIDER, format!("subtitle fetch failed: {e}")))?;
                if !resp.status().is_success() {
                    return Err(Error::upstream(PROVIDER, format!("subtitle fetch returned {}", resp.status())));
                }
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| Error::upstream(PROVIDER, format!("subtitle body failed: {e}")))?;
                let vtt = to_webvtt(&bytes)?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let part = path.with_extension("vtt.part");
                tokio::fs::write(&part, vtt).await?;
                tokio::fs::rename(&part, &path).await?;
                Ok(path)
            })
            .await
    }

    async fn download_url(&self, reference: &str) -> Result<String> {
        if let Some(id) = reference.strip_prefix(PROVIDER_REF_PREFIX) {
            let file_id: u64 = id
                .parse()
                .map_err(|_| Error::Validation(format!("invalid subtitle reference '{reference}'")))?;
            let client = self
                .client
                .as_ref()
                .ok_or_else(|| Error::Configuration("providers.opensubtitles_api_key is not set".into()))?;
            return client.download_link(file_id).await;
        }
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Ok(reference.to_string());
        }
        Err(Error::Validation(format!("unsupported subtitle url '{reference}'")))
    }

    /// External tracks in `lang` for a title. Provider failures leave the
    /// list empty.
    pub async fn external_tracks(&self, imdb_id: &str, content: &ContentId, lang: &str) -> Vec<SubtitleStream> {
        let Some(client) = self.client.as_ref() else {
            return Vec::new();
        };
        let hits = match client.search(imdb_id, content, lang).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(imdb_id, lang, error = %e, "Subtitle search failed");
                return Vec::new();
            }
        };
        let ranked = rank_hits(hits, lang);
        tracing::debug!(imdb_id, lang, found = ranked.len(), "Subtitle search finished");

        ranked
            .into_iter()
            .take(MAX_EXTERNAL_TRACKS)
            .enumerate()
            .map(|(i, hit)| {
                let reference = format!("{PROVIDER_REF_PREFIX}{}", hit.file_id);
                SubtitleStream {
                    index: EXTERNAL_SUBTITLE_BASE + i as u32,
                    codec: "webvtt".into(),
                    language: Some(normalize_lang(&hit.language)),
                    title: hit.release,
                    default: false,
                    forced: false,
                    text_based: true,
                    external_url: Some(format!(
                        "/api/subtitles.external.vtt?url={}",
                        urlencoding::encode(&reference)
                    )),
                }
            })
            .collect()
    }

    /// Delete cached files older than the TTL, and abandoned partial files.
    pub fn prune_files(&self) -> usize {
        let mut removed = 0;
        for sub in ["internal", "external"] {
            let Ok(entries) = std::fs::read_dir(self.dir.join(sub)) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !self.is_fresh(&path) && std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "Pruned subtitle files");
        }
        removed
    }
}
