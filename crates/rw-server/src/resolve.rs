//! Resolution coordinator.
//!
//! Turns a title request into a playable source. In order:
//!
//! 1. a healthy playback session for the key is served as is (revalidated
//!    first when its validation deadline has passed);
//! 2. a quick-start result is served when its filename still plausibly
//!    belongs to the requested title;
//! 3. otherwise one shared resolution per key runs discovery, ranking and
//!    reification down the ranked list, then probes tracks and writes the
//!    result through every cache tier.
//!
//! Concurrent identical requests join the same in-flight resolution through
//! [`SingleFlight`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use rw_av::{AudioStream, MediaProbe, MediaProber, SubtitleStream};
use rw_core::{
    Container, ContentId, Error, PlaybackSession, Quality, ResolveKey, ResolvedSource, Result, SessionReuse,
    SourceHash,
};
use rw_source::debrid::{remux_input, REMUX_PATH};
use rw_source::{
    plausible_match, rank_candidates, CandidateQuery, CandidateSource, RankRequest, RankedCandidate, Reifier,
    ReifyRequest, TitleDetails, TmdbClient, Verification,
};
use serde::{Deserialize, Serialize};

use crate::cache::{probe_key, CacheStore};
use crate::sessions::SessionTracker;
use crate::subtitles::SubtitleService;

// ---------------------------------------------------------------------------
// SingleFlight
// ---------------------------------------------------------------------------

type SharedResult<V> = Shared<BoxFuture<'static, std::result::Result<V, Arc<Error>>>>;

/// Deduplicates concurrent computations by key: the first caller starts the
/// work, later callers await the same future, and the entry is dropped when
/// it completes.
pub struct SingleFlight<V: Clone + Send + Sync + 'static> {
    inflight: DashMap<String, SharedResult<V>>,
}

impl<V: Clone + Send + Sync + 'static> Default for SingleFlight<V> {
    fn default() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> SingleFlight<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make` unless a computation for `key` is already in flight, in
    /// which case join it. Failures seen by a joined caller come back as
    /// [`Error::Shared`].
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let fut = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(e) => {
                tracing::debug!(key, "Joining in-flight computation");
                e.get().clone()
            }
            Entry::Vacant(e) => {
                let fut = make().map(|r| r.map_err(Arc::new)).boxed().shared();
                e.insert(fut.clone());
                fut
            }
        };

        let result = fut.clone().await;
        self.inflight.remove_if(key, |_, current| current.ptr_eq(&fut));
        result.map_err(Error::Shared)
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// Everything a caller can say about what to resolve.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub content: ContentId,
    pub title: Option<String>,
    pub year: Option<u32>,
    pub imdb_id: Option<String>,
    pub runtime_minutes: Option<u32>,
    /// Normalized; `auto` when the caller has no preference.
    pub audio_lang: String,
    pub quality: Option<Quality>,
    pub subtitle_lang: Option<String>,
    pub source_hash: Option<SourceHash>,
    pub min_seeders: Option<u32>,
    pub allowed_formats: Vec<Container>,
}

impl ResolveRequest {
    pub fn new(content: ContentId) -> Self {
        Self {
            content,
            title: None,
            year: None,
            imdb_id: None,
            runtime_minutes: None,
            audio_lang: rw_core::AUTO_LANG.to_string(),
            quality: None,
            subtitle_lang: None,
            source_hash: None,
            min_seeders: None,
            allowed_formats: Vec::new(),
        }
    }

    pub fn key(&self) -> ResolveKey {
        ResolveKey::new(self.content, &self.audio_lang, self.quality)
    }
}

/// Streams found in the source and which ones to play.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub audio: Vec<AudioStream>,
    pub subtitles: Vec<SubtitleStream>,
    pub selected_audio: Option<u32>,
    pub selected_subtitle: Option<u32>,
    pub duration_secs: Option<f64>,
}

impl TrackInfo {
    fn from_probe(probe: &MediaProbe, audio_lang: &str) -> Self {
        Self {
            audio: probe.audio_streams.clone(),
            subtitles: probe.subtitle_streams.clone(),
            selected_audio: probe.pick_audio(Some(audio_lang)).map(|a| a.index),
            selected_subtitle: None,
            duration_secs: probe.duration_secs,
        }
    }
}

/// Ways to play the source: the upstream URL, the remux proxy, and HLS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackLinks {
    pub direct: String,
    pub remux: String,
    pub hls: String,
}

impl PlaybackLinks {
    pub fn new(direct: &str, audio_stream: Option<u32>) -> Self {
        let input = urlencoding::encode(direct);
        let audio = audio_stream.map(|i| format!("&audioStream={i}")).unwrap_or_default();
        Self {
            direct: direct.to_string(),
            remux: format!("{REMUX_PATH}?input={input}{audio}"),
            hls: format!("/api/hls/master.m3u8?input={input}{audio}"),
        }
    }
}

/// A complete answer for one resolution key. This is what the quick-start
/// cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub source: ResolvedSource,
    pub tracks: TrackInfo,
    pub links: PlaybackLinks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ServedFrom {
    Session,
    QuickStart,
    Fresh,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub key: String,
    #[serde(flatten)]
    pub resolution: Resolution,
    pub session: Option<PlaybackSession>,
    pub served_from: ServedFrom,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcesResponse {
    pub key: String,
    pub imdb_id: String,
    pub total: usize,
    pub candidates: Vec<RankedCandidate>,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// External collaborators of the resolver.
#[derive(Clone)]
pub struct Providers {
    pub indexer: Arc<dyn CandidateSource>,
    pub reifier: Arc<dyn Reifier>,
    pub prober: Arc<dyn MediaProber>,
    pub tmdb: Option<Arc<TmdbClient>>,
}

pub struct Resolver {
    providers: Providers,
    cache: Arc<CacheStore>,
    sessions: Arc<SessionTracker>,
    subtitles: Arc<SubtitleService>,
    flights: SingleFlight<Resolution>,
    budget: Duration,
    max_candidates: usize,
}

struct Lookup {
    details: TitleDetails,
    imdb_id: String,
}

impl Resolver {
    pub fn new(
        providers: Providers,
        cache: Arc<CacheStore>,
        sessions: Arc<SessionTracker>,
        subtitles: Arc<SubtitleService>,
        budget: Duration,
        max_candidates: usize,
    ) -> Self {
        Self {
            providers,
            cache,
            sessions,
            subtitles,
            flights: SingleFlight::new(),
            budget,
            max_candidates: max_candidates.max(1),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Resolve a request to a playable source.
    ///
    /// A forced source hash skips session reuse and the quick-start cache.
    pub async fn resolve(self: &Arc<Self>, req: ResolveRequest) -> Result<ResolveResponse> {
        let key = req.key();
        let cache_key = key.cache_key();
        let mut bypass = req.source_hash.is_some();

        if !bypass {
            let lookup_key = key.clone();
            if let Some(session) = self.sessions.run(move |s| s.get(&lookup_key)).await? {
                match session.reuse_decision(rw_core::now_ms()) {
                    SessionReuse::Reuse => return self.serve_session(&req, session).await,
                    SessionReuse::Revalidate => match self.revalidate(&key, &session).await? {
                        Some(session) => return self.serve_session(&req, session).await,
                        None => bypass = true,
                    },
                    SessionReuse::Bypass => {
                        tracing::info!(key = %cache_key, health = %session.health, "Session untrusted; bypassing caches");
                        bypass = true;
                    }
                }
            }
        }

        if !bypass {
            if let Some(resolution) = self.cache.get_quick_start(&cache_key) {
                if plausible_match(&resolution.source.filename, req.title.as_deref(), req.year) {
                    tracing::debug!(key = %cache_key, "Quick-start hit");
                    let (store_key, source) = (key.clone(), resolution.source.clone());
                    let session = self.sessions.run(move |s| s.store_resolved(&store_key, &source)).await?;
                    return Ok(ResolveResponse {
                        key: cache_key,
                        resolution,
                        session,
                        served_from: ServedFrom::QuickStart,
                    });
                }
                tracing::info!(
                    key = %cache_key,
                    filename = %resolution.source.filename,
                    "Quick-start entry does not match title; evicting"
                );
                self.cache.invalidate_quick_start(&cache_key);
            }
        }

        let flight_key = match &req.source_hash {
            Some(hash) => format!("{cache_key}#{hash}"),
            None => cache_key.clone(),
        };
        let this = Arc::clone(self);
        let fresh = req.clone();
        let resolution = self
            .flights
            .run(&flight_key, move || async move { this.resolve_fresh(fresh, bypass).await })
            .await?;

        Ok(ResolveResponse {
            key: cache_key,
            resolution,
            session: self.sessions.run(move |s| s.get(&key)).await?,
            served_from: ServedFrom::Fresh,
        })
    }

    /// Ranked candidates for a request, without reifying any of them.
    pub async fn sources(&self, req: &ResolveRequest) -> Result<SourcesResponse> {
        let lookup = self.lookup(req).await?;
        let ranked = self.rank(req, &lookup).await?;
        Ok(SourcesResponse {
            key: req.key().cache_key(),
            imdb_id: lookup.imdb_id,
            total: ranked.len(),
            candidates: ranked,
        })
    }

    async fn serve_session(&self, req: &ResolveRequest, session: PlaybackSession) -> Result<ResolveResponse> {
        let key = req.key();
        let cache_key = key.cache_key();
        let resolution = match self.cache.get_quick_start(&cache_key) {
            Some(r) if r.source == session.source => r,
            _ => {
                let r = self.describe(&session.source, req, req.imdb_id.as_deref()).await;
                self.cache.put_quick_start(&cache_key, &r);
                r
            }
        };
        tracing::debug!(key = %cache_key, "Serving from playback session");
        Ok(ResolveResponse {
            key: cache_key,
            resolution,
            session: Some(session),
            served_from: ServedFrom::Session,
        })
    }

    /// Probe a session's source. Returns the refreshed session when it is
    /// still reachable.
    async fn revalidate(&self, key: &ResolveKey, session: &PlaybackSession) -> Result<Option<PlaybackSession>> {
        let url = &session.source.playable_url;
        match self.providers.reifier.verify(url).await {
            Verification::Verified | Verification::Uncertain => {
                tracing::debug!(session = %session.session_key, "Session source revalidated");
                let key = key.clone();
                self.sessions.run(move |s| s.mark_validated(&key)).await
            }
            Verification::Dead => {
                tracing::info!(session = %session.session_key, url = %url, "Session source is gone");
                let failed_key = key.clone();
                self.sessions
                    .run(move |s| s.mark_validation_failed(&failed_key, "source unreachable on revalidation"))
                    .await?;
                self.cache.invalidate_quick_start(&key.cache_key());
                Ok(None)
            }
        }
    }

    async fn resolve_fresh(self: Arc<Self>, req: ResolveRequest, bypass: bool) -> Result<Resolution> {
        let budget = self.budget;
        let key = req.key();
        match tokio::time::timeout(budget, self.resolve_inner(&req, bypass)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(key = %key, budget_secs = budget.as_secs(), "Resolution budget exhausted");
                Err(Error::Timeout(format!("resolution of {key} exceeded {}s", budget.as_secs())))
            }
        }
    }

    async fn resolve_inner(&self, req: &ResolveRequest, bypass: bool) -> Result<Resolution> {
        let key = req.key();
        let lookup = self.lookup(req).await?;
        let ranked = self.rank(req, &lookup).await?;

        let mut last_error: Option<Error> = None;
        let mut chosen: Option<ResolvedSource> = None;
        for (position, ranked) in ranked.iter().enumerate() {
            let hash = &ranked.candidate.info_hash;
            if !bypass {
                if let Some(source) = self.cached_stream(hash, &req.content).await {
                    tracing::debug!(hash = %hash, "Using cached stream for candidate");
                    chosen = Some(source);
                    break;
                }
            }

            let reify = ReifyRequest {
                candidate: ranked.candidate.clone(),
                display_name: lookup.details.title.clone(),
                episode: req.content.episode(),
            };
            match self.providers.reifier.reify(&reify).await {
                Ok(source) => {
                    tracing::info!(
                        key = %key,
                        hash = %hash,
                        rank = position,
                        score = ranked.score,
                        filename = %source.filename,
                        "Reified candidate"
                    );
                    self.cache.put_stream(hash, &req.content, &source, true);
                    chosen = Some(source);
                    break;
                }
                Err(e @ Error::Configuration(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(key = %key, hash = %hash, rank = position, error = %e, "Candidate failed; trying next");
                    last_error = Some(e);
                }
            }
        }

        let Some(source) = chosen else {
            let detail = last_error.map(|e| e.to_string()).unwrap_or_else(|| "no candidates".into());
            return Err(Error::upstream(
                self.providers.reifier.name(),
                format!("all {} candidates failed for {key}; last error: {detail}", ranked.len()),
            ));
        };

        let resolution = self.describe(&source, req, Some(&lookup.imdb_id)).await;

        let cache_key = key.cache_key();
        self.cache.put_quick_start(&cache_key, &resolution);
        let explicit_lang = !key.is_auto_lang();
        let (store_key, stored) = (key.clone(), source.clone());
        self.sessions
            .run(move |s| {
                s.store_resolved(&store_key, &stored)?;
                if explicit_lang {
                    s.invalidate_auto(&store_key)?;
                }
                Ok(())
            })
            .await?;
        if explicit_lang {
            self.cache.invalidate_quick_start(&key.as_auto().cache_key());
        }

        Ok(resolution)
    }

    /// A cached reification for the candidate, revalidated when due.
    async fn cached_stream(&self, hash: &SourceHash, content: &ContentId) -> Option<ResolvedSource> {
        let cached = self.cache.get_stream(hash, content)?;
        if !cached.needs_validation {
            return Some(cached.source);
        }
        match self.providers.reifier.verify(&cached.source.playable_url).await {
            Verification::Dead => {
                tracing::debug!(hash = %hash, "Cached stream is gone; evicting");
                self.cache.evict_stream(hash, content);
                None
            }
            _ => {
                self.cache.mark_stream_validated(hash, content);
                Some(cached.source)
            }
        }
    }

    /// Fill in title details and the IMDb id the indexer needs.
    async fn lookup(&self, req: &ResolveRequest) -> Result<Lookup> {
        let mut details = TitleDetails {
            title: req.title.clone(),
            year: req.year,
            runtime_minutes: req.runtime_minutes,
            imdb_id: req.imdb_id.clone(),
        };

        if details.imdb_id.is_none() || details.title.is_none() {
            match self.title_details(&req.content).await {
                Ok(Some(found)) => {
                    details.title = details.title.or(found.title);
                    details.year = details.year.or(found.year);
                    details.runtime_minutes = details.runtime_minutes.or(found.runtime_minutes);
                    details.imdb_id = details.imdb_id.or(found.imdb_id);
                }
                Ok(None) => {}
                Err(e) if details.imdb_id.is_some() => {
                    tracing::warn!(content = %req.content, error = %e, "Title details unavailable");
                }
                Err(e) => return Err(e),
            }
        }

        let imdb_id = details
            .imdb_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                Error::Validation(format!(
                    "no IMDb id known for {}; pass imdbId or configure providers.tmdb_api_key",
                    req.content
                ))
            })?;
        Ok(Lookup { details, imdb_id })
    }

    async fn title_details(&self, content: &ContentId) -> Result<Option<TitleDetails>> {
        let Some(tmdb) = self.providers.tmdb.as_ref() else {
            return Ok(None);
        };
        let cache_key = format!("details:{}", content.title_key());
        if let Some(details) = self.cache.get_metadata::<TitleDetails>(&cache_key) {
            return Ok(Some(details));
        }
        let details = tmdb.details(content).await?;
        self.cache.put_metadata(&cache_key, &details);
        Ok(Some(details))
    }

    async fn rank(&self, req: &ResolveRequest, lookup: &Lookup) -> Result<Vec<RankedCandidate>> {
        let query = CandidateQuery {
            content: req.content,
            imdb_id: lookup.imdb_id.clone(),
        };
        let candidates = self.providers.indexer.discover(&query).await?;
        if candidates.is_empty() {
            return Err(Error::upstream(
                self.providers.indexer.name(),
                format!("no candidates for {}", req.content),
            ));
        }

        let hashes: Vec<SourceHash> = candidates.iter().map(|c| c.info_hash.clone()).collect();
        let health = self.sessions.run(move |s| Ok(s.health_for(&hashes))).await?;

        let rank_request = RankRequest {
            title: lookup.details.title.clone(),
            year: lookup.details.year,
            runtime_minutes: lookup.details.runtime_minutes,
            audio_lang: req.audio_lang.clone(),
            quality: req.quality,
            min_seeders: req.min_seeders.unwrap_or(0),
            allowed_formats: req.allowed_formats.clone(),
            forced_hash: req.source_hash.clone(),
            limit: self.max_candidates,
            ..RankRequest::new(req.content)
        };
        let ranked = rank_candidates(&candidates, &rank_request, &health);
        tracing::debug!(
            content = %req.content,
            discovered = candidates.len(),
            ranked = ranked.len(),
            top = ?ranked.first().map(|r| r.score),
            "Ranked candidates"
        );
        if ranked.is_empty() {
            return Err(Error::upstream(
                self.providers.indexer.name(),
                format!("no candidate for {} passed the filters", req.content),
            ));
        }
        Ok(ranked)
    }

    /// Probe the source's tracks and assemble the response. Probe and
    /// subtitle-provider failures only leave the track listing empty.
    async fn describe(&self, source: &ResolvedSource, req: &ResolveRequest, imdb_id: Option<&str>) -> Resolution {
        let direct = remux_input(&source.playable_url).unwrap_or_else(|| source.playable_url.clone());
        let key = probe_key(source.source_hash.as_ref(), source.selected_file.as_deref(), &direct);

        let probe = match self.cache.get_probe(&key) {
            Some(probe) => Some(probe),
            None => match self.providers.prober.probe(&direct).await {
                Ok(probe) => {
                    self.cache.put_probe(&key, &probe);
                    Some(probe)
                }
                Err(e) => {
                    tracing::warn!(url = %direct, error = %e, "Track probe failed");
                    None
                }
            },
        };

        let mut tracks = probe
            .as_ref()
            .map(|p| TrackInfo::from_probe(p, &req.audio_lang))
            .unwrap_or_default();

        if let Some(lang) = req.subtitle_lang.as_deref().filter(|l| !l.is_empty()) {
            match probe.as_ref().and_then(|p| p.pick_subtitle(lang)) {
                Some(internal) => tracks.selected_subtitle = Some(internal.index),
                None => {
                    if let Some(imdb_id) = imdb_id {
                        let external = self.subtitles.external_tracks(imdb_id, &req.content, lang).await;
                        tracks.selected_subtitle = external.first().map(|s| s.index);
                        tracks.subtitles.extend(external);
                    }
                }
            }
        }

        Resolution {
            source: source.clone(),
            links: PlaybackLinks::new(&direct, tracks.selected_audio),
            tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn single_flight_shares_one_computation() {
        let flight: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flight
                    .run("k", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(7)
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn single_flight_shares_failure_and_allows_retry() {
        let flight: SingleFlight<u32> = SingleFlight::new();
        let err = flight
            .run("k", || async { Err(Error::upstream("debrid", "down")) })
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 502);
        assert_eq!(err.code(), "upstream_error");

        let ok = flight.run("k", || async { Ok(1) }).await.unwrap();
        assert_eq!(ok, 1);
    }

    #[test]
    fn links_encode_input_and_audio() {
        let links = PlaybackLinks::new("https://cdn/a b.mkv", Some(2));
        assert_eq!(links.direct, "https://cdn/a b.mkv");
        assert_eq!(links.remux, "/api/remux?input=https%3A%2F%2Fcdn%2Fa%20b.mkv&audioStream=2");
        assert_eq!(links.hls, "/api/hls/master.m3u8?input=https%3A%2F%2Fcdn%2Fa%20b.mkv&audioStream=2");
        assert_eq!(remux_input(&links.remux).as_deref(), Some("https://cdn/a b.mkv"));
    }

    #[test]
    fn request_key_normalizes_language() {
        let mut req = ResolveRequest::new(ContentId::Movie { tmdb_id: 603 });
        req.audio_lang = "FRE".into();
        req.quality = Some(Quality::Hd1080);
        assert_eq!(req.key().cache_key(), "movie:603|fr|1080p");
    }

    #[test]
    fn track_info_selects_preferred_audio() {
        let probe = MediaProbe {
            duration_secs: Some(100.0),
            audio_streams: vec![
                AudioStream {
                    index: 1,
                    codec: "aac".into(),
                    language: Some("eng".into()),
                    title: None,
                    channels: Some(2),
                    default: true,
                    start_time: None,
                },
                AudioStream {
                    index: 2,
                    codec: "ac3".into(),
                    language: Some("fre".into()),
                    title: None,
                    channels: Some(6),
                    default: false,
                    start_time: None,
                },
            ],
            ..MediaProbe::default()
        };
        assert_eq!(TrackInfo::from_probe(&probe, "fr").selected_audio, Some(2));
        assert_eq!(TrackInfo::from_probe(&probe, "auto").selected_audio, Some(1));
    }
}
