//! API integration tests.
//!
//! Tests operational and preference endpoints against a [`TestHarness`]
//! server running on a random port with an in-memory SQLite database.

mod common;

use common::{matrix_query, TestHarness, FRENCH_HASH};
use rw_core::config::Config;

// ---------------------------------------------------------------------------
// Health and config
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_status_and_tools() {
    let (_harness, addr) = TestHarness::with_server().await;
    let resp = reqwest::get(format!("http://{addr}/api/health")).await.expect("request failed");
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-request-id"));

    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["sessionsEnabled"], true);
    assert_eq!(json["providers"]["debrid"], false);
    assert_eq!(json["providers"]["subtitles"], false);
    assert!(json["tools"].is_array());
}

#[tokio::test]
async fn request_id_is_echoed() {
    let (_harness, addr) = TestHarness::with_server().await;
    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/api/health"))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "req-42");
}

#[tokio::test]
async fn config_redacts_secrets() {
    let mut config = Config::default();
    config.providers.debrid_token = Some("super-secret".into());
    let (_harness, addr) = TestHarness::with_server_config(config).await;

    let resp = reqwest::get(format!("http://{addr}/api/config")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(!body.contains("super-secret"));

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["providers"]["debrid_token"], true);
    assert_eq!(json["providers"]["tmdb_api_key"], false);
    assert_eq!(json["transcode"]["segment_duration_secs"], 6);
}

#[tokio::test]
async fn unknown_api_route_is_404() {
    let (_harness, addr) = TestHarness::with_server().await;
    let resp = reqwest::get(format!("http://{addr}/api/nope")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

// ---------------------------------------------------------------------------
// Title preferences
// ---------------------------------------------------------------------------

#[tokio::test]
async fn preference_lifecycle_steers_resolution() {
    let (harness, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();
    let prefs = format!("http://{addr}/api/title/preferences");

    let resp = client.get(format!("{prefs}?tmdbId=603")).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(&prefs)
        .json(&serde_json::json!({"tmdbId": 603, "audioLang": "French"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["titleKey"], "movie:603");
    assert_eq!(json["audioLang"], "fr");

    let resp = client.get(format!("{prefs}?tmdbId=603")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    // A resolve without audioLang picks up the stored preference.
    let url = format!("http://{addr}/api/resolve/movie?{}", matrix_query(""));
    let json: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(json["key"], "movie:603|fr|any");
    assert_eq!(json["source"]["sourceHash"], FRENCH_HASH);
    assert_eq!(harness.reifier.count(), 1);

    let resp = client.delete(format!("{prefs}?tmdbId=603")).send().await.unwrap();
    assert_eq!(resp.status(), 204);
    let resp = client.delete(format!("{prefs}?tmdbId=603")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn preference_rejects_unknown_type() {
    let (_harness, addr) = TestHarness::with_server().await;
    let resp = reqwest::get(format!("http://{addr}/api/title/preferences?tmdbId=1&type=book"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

// ---------------------------------------------------------------------------
// Debug
// ---------------------------------------------------------------------------

#[tokio::test]
async fn debug_cache_reports_and_clears_entries() {
    let (_harness, addr) = TestHarness::with_server().await;
    let url = format!("http://{addr}/api/resolve/movie?{}", matrix_query(""));
    assert_eq!(reqwest::get(&url).await.unwrap().status(), 200);

    let json: serde_json::Value = reqwest::get(format!("http://{addr}/api/debug/cache"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["cache"]["memory"]["quickStart"], 1);
    assert_eq!(json["sessions"]["healthy"], 1);
    assert_eq!(json["resolutionsInFlight"], 0);
    assert!(json.get("cleared").is_none());

    let json: serde_json::Value = reqwest::get(format!("http://{addr}/api/debug/cache?clear=1"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(json["cleared"].as_u64().unwrap() >= 1);
    assert_eq!(json["cache"]["memory"]["quickStart"], 0);
}

// ---------------------------------------------------------------------------
// Native player
// ---------------------------------------------------------------------------

#[tokio::test]
async fn native_play_without_player_is_a_configuration_error() {
    let (_harness, addr) = TestHarness::with_server().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/native/play"))
        .json(&serde_json::json!({"url": "/api/remux?input=x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "configuration_error");
}
