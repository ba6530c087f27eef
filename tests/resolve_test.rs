//! Resolution integration tests.
//!
//! Drives `/api/resolve/*` against a [`TestHarness`] server with scripted
//! indexer, reifier and prober, and checks ranking, caching, single-flight
//! and session-driven invalidation through the reifier call counts.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{matrix_query, TestHarness, ENGLISH_HASH, FRENCH_HASH, IMDB_ID};
use rw_core::config::Config;

async fn get_json(url: &str) -> (u16, serde_json::Value) {
    let resp = reqwest::get(url).await.expect("request failed");
    let status = resp.status().as_u16();
    let json = resp.json().await.expect("response is not JSON");
    (status, json)
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sources_rank_french_release_first_for_french_audio() {
    let (harness, addr) = TestHarness::with_server().await;
    let url = format!("http://{addr}/api/resolve/sources?{}", matrix_query("&audioLang=fr"));

    let (status, json) = get_json(&url).await;
    assert_eq!(status, 200);
    assert_eq!(json["imdbId"], "tt0133093");
    assert_eq!(json["total"], 2);
    assert_eq!(json["candidates"][0]["candidate"]["infoHash"], FRENCH_HASH);
    assert_eq!(json["candidates"][1]["candidate"]["infoHash"], ENGLISH_HASH);

    // Listing never reifies.
    assert_eq!(harness.reifier.count(), 0);
}

#[tokio::test]
async fn resolve_movie_picks_language_match_and_audio_track() {
    let (harness, addr) = TestHarness::with_server().await;
    let url = format!("http://{addr}/api/resolve/movie?{}", matrix_query("&audioLang=French"));

    let (status, json) = get_json(&url).await;
    assert_eq!(status, 200);
    assert_eq!(json["servedFrom"], "fresh");
    assert_eq!(json["source"]["sourceHash"], FRENCH_HASH);
    assert_eq!(json["source"]["playableUrl"], format!("http://cdn.test/{FRENCH_HASH}.mp4"));
    assert_eq!(json["tracks"]["selectedAudio"], 2);
    assert!(json["key"].as_str().unwrap().contains("|fr|"));

    let hls = json["links"]["hls"].as_str().unwrap();
    assert!(hls.starts_with("/api/hls/master.m3u8?input="));
    assert!(hls.ends_with("&audioStream=2"));
    assert_eq!(harness.reifier.count(), 1);
}

#[tokio::test]
async fn forced_source_hash_wins() {
    let (harness, addr) = TestHarness::with_server().await;
    let url = format!(
        "http://{addr}/api/resolve/movie?{}",
        matrix_query(&format!("&audioLang=fr&sourceHash={ENGLISH_HASH}"))
    );

    let (status, json) = get_json(&url).await;
    assert_eq!(status, 200);
    assert_eq!(json["source"]["sourceHash"], ENGLISH_HASH);
    assert_eq!(harness.reifier.count(), 1);
}

// ---------------------------------------------------------------------------
// Caching and single-flight
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_resolve_is_served_from_session() {
    let (harness, addr) = TestHarness::with_server().await;
    let url = format!("http://{addr}/api/resolve/movie?{}", matrix_query(""));

    let (status, first) = get_json(&url).await;
    assert_eq!(status, 200);
    assert_eq!(first["servedFrom"], "fresh");
    assert_eq!(first["session"]["health"], "healthy");

    let (status, second) = get_json(&url).await;
    assert_eq!(status, 200);
    assert_eq!(second["servedFrom"], "session");
    assert_eq!(second["source"], first["source"]);

    assert_eq!(harness.reifier.count(), 1);
    assert_eq!(harness.indexer.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_requests_share_one_reification() {
    let (harness, addr) = TestHarness::with_server_delay(Duration::from_millis(300)).await;
    let url = format!("http://{addr}/api/resolve/movie?{}", matrix_query(""));

    let requests = (0..8).map(|_| {
        let url = url.clone();
        tokio::spawn(async move { get_json(&url).await })
    });
    let results = futures::future::join_all(requests).await;

    let mut urls = Vec::new();
    for result in results {
        let (status, json) = result.expect("task panicked");
        assert_eq!(status, 200);
        urls.push(json["source"]["playableUrl"].as_str().unwrap().to_string());
    }
    urls.dedup();
    assert_eq!(urls.len(), 1);
    assert_eq!(harness.reifier.count(), 1);
    assert_eq!(harness.ctx.resolver.in_flight(), 0);
}

#[tokio::test]
async fn decode_error_forces_fresh_reification() {
    let (harness, addr) = TestHarness::with_server().await;
    let url = format!("http://{addr}/api/resolve/movie?{}", matrix_query(""));
    let client = reqwest::Client::new();

    let (status, _) = get_json(&url).await;
    assert_eq!(status, 200);
    assert_eq!(harness.reifier.count(), 1);

    // sendBeacon posts text/plain.
    let resp = client
        .post(format!("http://{addr}/api/session/progress"))
        .header("content-type", "text/plain")
        .body(r#"{"tmdbId":603,"event":"decode_error","error":"PIPELINE_ERROR_DECODE","currentTime":4}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["tracked"], true);
    assert_eq!(json["session"]["health"], "invalid");
    assert_eq!(json["session"]["failCount"], 1);

    let (status, json) = get_json(&url).await;
    assert_eq!(status, 200);
    assert_eq!(json["servedFrom"], "fresh");
    assert_eq!(json["session"]["health"], "healthy");
    assert_eq!(harness.reifier.count(), 2);
}

// ---------------------------------------------------------------------------
// Quick-start cache and revalidation
// ---------------------------------------------------------------------------

fn sessions_disabled() -> Config {
    let mut config = Config::default();
    config.playback.sessions_enabled = false;
    config
}

#[tokio::test]
async fn quick_start_serves_repeat_requests_without_sessions() {
    let (harness, addr) = TestHarness::with_server_config(sessions_disabled()).await;
    let url = format!("http://{addr}/api/resolve/movie?{}", matrix_query(""));

    let (_, first) = get_json(&url).await;
    assert_eq!(first["servedFrom"], "fresh");
    assert!(first["session"].is_null());

    let (status, second) = get_json(&url).await;
    assert_eq!(status, 200);
    assert_eq!(second["servedFrom"], "quickStart");
    assert_eq!(second["source"], first["source"]);
    assert_eq!(harness.reifier.count(), 1);
    assert_eq!(harness.indexer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn quick_start_entry_for_another_title_is_evicted() {
    let (harness, addr) = TestHarness::with_server_config(sessions_disabled()).await;
    let matrix = format!("http://{addr}/api/resolve/movie?{}", matrix_query(""));
    let (_, first) = get_json(&matrix).await;
    assert_eq!(first["servedFrom"], "fresh");

    // Same cache key, but the cached file is not this title.
    let other = format!("http://{addr}/api/resolve/movie?tmdbId=603&title=Inception&year=2010&imdbId={IMDB_ID}");
    let (status, json) = get_json(&other).await;
    assert_eq!(status, 200);
    assert_eq!(json["servedFrom"], "fresh");
    assert_eq!(json["key"], first["key"]);
    assert_eq!(harness.indexer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn due_session_is_revalidated_and_dropped_when_dead() {
    let mut config = Config::default();
    config.playback.validation_interval_secs = 0;
    let (harness, addr) = TestHarness::with_server_config(config).await;
    let url = format!("http://{addr}/api/resolve/movie?{}", matrix_query(""));

    let (_, first) = get_json(&url).await;
    assert_eq!(first["servedFrom"], "fresh");

    // Due immediately, still reachable: reused after one check.
    let (_, second) = get_json(&url).await;
    assert_eq!(second["servedFrom"], "session");
    assert_eq!(harness.reifier.verify_count(), 1);
    assert_eq!(harness.reifier.count(), 1);

    harness.reifier.expire_links();
    let (status, third) = get_json(&url).await;
    assert_eq!(status, 200);
    assert_eq!(third["servedFrom"], "fresh");
    assert_eq!(third["session"]["health"], "healthy");
    assert_eq!(harness.reifier.verify_count(), 2);
    assert_eq!(harness.reifier.count(), 2);
}

#[tokio::test]
async fn dead_cached_stream_is_reified_again() {
    for expire in [false, true] {
        let mut config = sessions_disabled();
        config.cache.ephemeral_validation_secs = 0;
        let (harness, addr) = TestHarness::with_server_config(config).await;

        let (_, first) = get_json(&format!("http://{addr}/api/resolve/movie?{}", matrix_query(""))).await;
        assert_eq!(first["source"]["sourceHash"], ENGLISH_HASH);
        if expire {
            harness.reifier.expire_links();
        }

        // A different key misses the quick-start tier and reaches the
        // per-candidate stream cache, which is due for a check.
        let url = format!("http://{addr}/api/resolve/movie?{}", matrix_query("&audioLang=en"));
        let (status, json) = get_json(&url).await;
        assert_eq!(status, 200);
        assert_eq!(json["source"]["sourceHash"], ENGLISH_HASH);
        assert_eq!(harness.reifier.verify_count(), 1);
        assert_eq!(harness.reifier.count(), if expire { 2 } else { 1 }, "expire={expire}");
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_tmdb_id_is_rejected() {
    let (_harness, addr) = TestHarness::with_server().await;
    let (status, json) = get_json(&format!("http://{addr}/api/resolve/movie?title=x")).await;
    assert_eq!(status, 400);
    assert_eq!(json["code"], "validation_error");
}

#[tokio::test]
async fn tv_requires_episode_numbers() {
    let (_harness, addr) = TestHarness::with_server().await;
    let url = format!("http://{addr}/api/resolve/tv?tmdbId=1399&imdbId=tt0944947");
    let (status, json) = get_json(&url).await;
    assert_eq!(status, 400);
    assert_eq!(json["code"], "validation_error");
}

#[tokio::test]
async fn unknown_imdb_id_without_metadata_provider_is_rejected() {
    let (harness, addr) = TestHarness::with_server().await;
    let (status, json) = get_json(&format!("http://{addr}/api/resolve/movie?tmdbId=603")).await;
    assert_eq!(status, 400);
    assert!(json["error"].as_str().unwrap().contains("IMDb"));
    assert_eq!(harness.reifier.count(), 0);
}
