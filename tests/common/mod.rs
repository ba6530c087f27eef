//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which wires an in-memory DB, a scratch cache
//! directory and scripted providers into a full [`AppContext`]. The
//! [`TestHarness::with_server`] constructor starts Axum on a random port for
//! HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rw_av::{AudioStream, MediaProbe, MediaProber, ToolRegistry, VideoTiming};
use rw_core::config::Config;
use rw_core::{ResolvedSource, SourceHash};
use rw_db::pool::{get_conn, init_memory_pool, DbPool, PooledConnection};
use rw_server::context::AppContext;
use rw_server::resolve::Providers;
use rw_server::router::build_router;
use rw_source::{CandidateQuery, CandidateSource, ReifyRequest, Reifier, StreamCandidate, Verification};
use tempfile::TempDir;

pub const IMDB_ID: &str = "tt0133093";
pub const ENGLISH_HASH: &str = "1111111111111111111111111111111111111111";
pub const FRENCH_HASH: &str = "2222222222222222222222222222222222222222";

/// Query string for The Matrix with everything the resolver needs offline.
pub fn matrix_query(extra: &str) -> String {
    format!("tmdbId=603&title=The%20Matrix&year=1999&imdbId={IMDB_ID}{extra}")
}

// ---------------------------------------------------------------------------
// Scripted providers
// ---------------------------------------------------------------------------

/// Indexer returning a fixed English/French pair.
#[derive(Default)]
pub struct MockIndexer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl CandidateSource for MockIndexer {
    fn name(&self) -> &'static str {
        "mock-indexer"
    }

    async fn discover(&self, _query: &CandidateQuery) -> rw_core::Result<Vec<StreamCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            StreamCandidate::named(
                ENGLISH_HASH.parse()?,
                "The.Matrix.1999.1080p.BluRay.x264-ENG",
                2500,
            ),
            StreamCandidate::named(
                FRENCH_HASH.parse()?,
                "The.Matrix.1999.FRENCH.1080p.BluRay.x264-FR",
                12,
            ),
        ])
    }
}

/// Reifier that hands out `http://cdn.test/{hash}.mp4` after a delay.
/// Its URLs verify until [`MockReifier::expire_links`] is called.
pub struct MockReifier {
    pub calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub delay: Duration,
    links_dead: AtomicBool,
}

impl MockReifier {
    pub fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            delay,
            links_dead: AtomicBool::new(false),
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn verify_count(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    /// Every URL handed out so far (and later) now verifies as dead.
    pub fn expire_links(&self) {
        self.links_dead.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Reifier for MockReifier {
    fn name(&self) -> &'static str {
        "mock-debrid"
    }

    async fn reify(&self, request: &ReifyRequest) -> rw_core::Result<ResolvedSource> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let hash: &SourceHash = &request.candidate.info_hash;
        let filename = format!("{}.mp4", request.candidate.name);
        Ok(ResolvedSource {
            playable_url: format!("http://cdn.test/{hash}.mp4"),
            fallback_urls: Vec::new(),
            filename: filename.clone(),
            source_hash: Some(hash.clone()),
            selected_file: Some(filename),
        })
    }

    async fn verify(&self, _url: &str) -> Verification {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if self.links_dead.load(Ordering::SeqCst) {
            Verification::Dead
        } else {
            Verification::Verified
        }
    }
}

/// Prober describing a two-minute file with English and French audio.
#[derive(Default)]
pub struct MockProber {
    pub calls: AtomicUsize,
}

fn audio(index: u32, lang: &str, default: bool) -> AudioStream {
    AudioStream {
        index,
        codec: "aac".into(),
        language: Some(lang.into()),
        title: None,
        channels: Some(2),
        default,
        start_time: Some(0.0),
    }
}

#[async_trait]
impl MediaProber for MockProber {
    fn name(&self) -> &'static str {
        "mock-probe"
    }

    async fn probe(&self, _input: &str) -> rw_core::Result<MediaProbe> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MediaProbe {
            duration_secs: Some(120.0),
            format_name: Some("mp4".into()),
            video: Some(VideoTiming {
                codec: Some("h264".into()),
                start_time: Some(0.0),
                frame_rate: Some(24.0),
                bframe_lead: 0.0,
                height: Some(1080),
            }),
            audio_streams: vec![audio(1, "eng", true), audio(2, "fre", false)],
            subtitle_streams: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Test harness wrapping a fully-constructed [`AppContext`] backed by an
/// in-memory database and scripted providers.
pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    pub indexer: Arc<MockIndexer>,
    pub reifier: Arc<MockReifier>,
    pub prober: Arc<MockProber>,
    _cache_dir: TempDir,
}

impl TestHarness {
    /// Create a new harness with default configuration and in-memory DB.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a harness with a custom configuration. `server.cache_dir` is
    /// always redirected to a scratch directory.
    pub fn with_config(config: Config) -> Self {
        Self::with_reify_delay(config, Duration::from_millis(0))
    }

    pub fn with_reify_delay(mut config: Config, delay: Duration) -> Self {
        let cache_dir = tempfile::tempdir().expect("failed to create cache dir");
        config.server.cache_dir = cache_dir.path().to_path_buf();

        let db = init_memory_pool().expect("failed to create in-memory DB pool");
        let indexer = Arc::new(MockIndexer::default());
        let reifier = Arc::new(MockReifier::new(delay));
        let prober = Arc::new(MockProber::default());
        let providers = Providers {
            indexer: indexer.clone(),
            reifier: reifier.clone(),
            prober: prober.clone(),
            tmdb: None,
        };

        let ctx = AppContext::build(config, db.clone(), Arc::new(ToolRegistry::default()), providers)
            .expect("failed to build app context");

        Self {
            ctx,
            db,
            indexer,
            reifier,
            prober,
            _cache_dir: cache_dir,
        }
    }

    /// Create a harness and start an Axum server on a random port.
    /// Returns the harness and the bound address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::serve(Self::new()).await
    }

    /// Start a server with custom configuration.
    pub async fn with_server_config(config: Config) -> (Self, SocketAddr) {
        Self::serve(Self::with_config(config)).await
    }

    /// Start a server whose reifier sleeps before answering.
    pub async fn with_server_delay(delay: Duration) -> (Self, SocketAddr) {
        Self::serve(Self::with_reify_delay(Config::default(), delay)).await
    }

    async fn serve(harness: Self) -> (Self, SocketAddr) {
        let app = build_router(harness.ctx.clone(), None);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .expect("server error");
        });

        (harness, addr)
    }

    /// Get a DB connection from the pool.
    pub fn conn(&self) -> PooledConnection {
        get_conn(&self.db).expect("failed to get DB connection")
    }
}
