//! Debrid cache reifier.
//!
//! Turns a [`StreamCandidate`] into HTTP URLs through a Real-Debrid style
//! REST API: reuse or add the torrent, select the wanted file, wait for the
//! provider to report it downloaded, unrestrict the host links and probe
//! what comes back.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rw_core::{Container, ResolvedSource, SourceHash};
use serde::{Deserialize, Serialize};

use crate::candidate::StreamCandidate;
use crate::magnet::magnet_uri;
use crate::release::parse_release;
use crate::verify::{verify_url, Verification};

const PROVIDER: &str = "debrid";

/// Account torrent list reuse window.
const ACCOUNT_LIST_TTL: Duration = Duration::from_secs(30);

/// Statuses after which waiting is pointless.
const FATAL_STATUSES: &[&str] = &["error", "virus", "dead", "magnet_error", "invalid", "invalid_magnet"];

/// Path of the remux endpoint that wraps URLs needing software decoding.
pub const REMUX_PATH: &str = "/api/remux";

/// Everything the reifier needs for one candidate.
#[derive(Debug, Clone)]
pub struct ReifyRequest {
    pub candidate: StreamCandidate,
    /// Fallback name to look for when the indexer gave no file hint.
    pub display_name: Option<String>,
    /// Season/episode wanted from a multi-file torrent.
    pub episode: Option<(u32, u32)>,
}

/// Anything that can turn a candidate into playable URLs.
#[async_trait]
pub trait Reifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn reify(&self, request: &ReifyRequest) -> rw_core::Result<ResolvedSource>;

    /// Whether a URL produced earlier still answers.
    async fn verify(&self, url: &str) -> Verification;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Account details returned by `GET /user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebridAccount {
    pub username: String,
    #[serde(default, rename = "type")]
    pub account_type: String,
    /// ISO-8601 expiry of the premium subscription.
    #[serde(default)]
    pub expiration: Option<String>,
}

impl DebridAccount {
    pub fn is_premium(&self) -> bool {
        self.account_type == "premium"
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TorrentSummary {
    id: String,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct AddMagnetResponse {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TorrentInfo {
    #[serde(default)]
    status: String,
    #[serde(default)]
    files: Vec<TorrentFile>,
    #[serde(default)]
    links: Vec<String>,
}

/// One file inside a tracked torrent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TorrentFile {
    pub id: u32,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub bytes: u64,
    /// 1 when the file is selected for download.
    #[serde(default)]
    pub selected: u8,
}

impl TorrentFile {
    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    fn is_video(&self) -> bool {
        rw_core::is_video_path(&self.path)
    }
}

#[derive(Debug, Deserialize)]
struct UnrestrictResponse {
    download: String,
    #[serde(default)]
    filename: String,
}

// ---------------------------------------------------------------------------
// File selection and result ordering
// ---------------------------------------------------------------------------

/// Pick the file to stream: the hinted file, else one whose episode
/// signature matches, else the largest video, else the largest file.
pub fn select_file<'a>(
    files: &'a [TorrentFile],
    hint: Option<&str>,
    episode: Option<(u32, u32)>,
) -> Option<&'a TorrentFile> {
    if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
        let hint_name = hint.rsplit('/').next().unwrap_or(hint);
        if let Some(file) = files.iter().find(|f| f.basename().eq_ignore_ascii_case(hint_name)) {
            return Some(file);
        }
    }
    if let Some((season, ep)) = episode {
        if let Some(file) = files
            .iter()
            .filter(|f| f.is_video())
            .filter(|f| parse_release(f.basename()).matches_episode(season, ep))
            .max_by_key(|f| f.bytes)
        {
            return Some(file);
        }
    }
    files
        .iter()
        .filter(|f| f.is_video())
        .max_by_key(|f| f.bytes)
        .or_else(|| files.iter().max_by_key(|f| f.bytes))
}

/// Wrap a URL for the remux endpoint.
pub fn remux_url(url: &str) -> String {
    format!("{REMUX_PATH}?input={}", urlencoding::encode(url))
}

/// The original input of a URL produced by [`remux_url`], or `None` for any
/// other URL.
pub fn remux_input(url: &str) -> Option<String> {
    let encoded = url.strip_prefix(REMUX_PATH)?.strip_prefix("?input=")?;
    let encoded = encoded.split('&').next().unwrap_or(encoded);
    urlencoding::decode(encoded).ok().map(|s| s.into_owned())
}

/// Whether playback of this URL will most likely need the software path:
/// a container browsers cannot play, or a provider download URL with no
/// recognizable extension.
pub fn predicts_software_decode(url: &str, filename: &str) -> bool {
    let container = Container::from_extension(filename).or_else(|| Container::from_extension(url));
    match container {
        Some(c) => c.needs_software_path(),
        None => reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .is_some_and(|host| host.contains("download") || host.contains("debrid")),
    }
}

/// One unrestricted URL and what the probe said about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedLink {
    pub url: String,
    pub filename: String,
    pub verification: Verification,
}

/// Order probed links into playback variants: verified before uncertain,
/// dead dropped. Links predicted to need software decoding are offered
/// through the remux proxy first, raw second; browser-playable links are
/// offered raw first.
pub fn order_variants(links: &[ProbedLink]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tier in [Verification::Verified, Verification::Uncertain] {
        for link in links.iter().filter(|l| l.verification == tier) {
            let variants = if predicts_software_decode(&link.url, &link.filename) {
                [remux_url(&link.url), link.url.clone()]
            } else {
                [link.url.clone(), remux_url(&link.url)]
            };
            for v in variants {
                if !out.contains(&v) {
                    out.push(v);
                }
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct RealDebridClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    ready_timeout: Duration,
    poll_interval: Duration,
    verify_timeout: Duration,
    account_cache: Mutex<Option<(Instant, Vec<TorrentSummary>)>>,
}

impl RealDebridClient {
    pub fn new(base_url: &str, token: String, request_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            ready_timeout: Duration::from_secs(18),
            poll_interval: Duration::from_secs(1),
            verify_timeout: Duration::from_secs(8),
            account_cache: Mutex::new(None),
        }
    }

    pub fn with_timings(mut self, ready_timeout: Duration, poll_interval: Duration, verify_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self.poll_interval = poll_interval;
        self.verify_timeout = verify_timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.token.trim().is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Check the token against the account endpoint.
    ///
    /// A rejected token is a [`rw_core::Error::Configuration`]; an
    /// unreachable service is an upstream error.
    pub async fn validate_token(&self) -> rw_core::Result<DebridAccount> {
        if !self.is_configured() {
            return Err(rw_core::Error::Configuration("debrid token is not set".into()));
        }
        self.json(self.http.get(self.url("/user")), "account lookup").await
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> rw_core::Result<reqwest::Response> {
        let resp = req
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| rw_core::Error::upstream(PROVIDER, format!("{what} failed: {e}")))?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(rw_core::Error::Configuration(format!("debrid token rejected ({status})")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(rw_core::Error::upstream(PROVIDER, format!("{what}: HTTP {status} {body}")));
        }
        Ok(resp)
    }

    async fn json<T: serde::de::DeserializeOwned>(&self, req: reqwest::RequestBuilder, what: &str) -> rw_core::Result<T> {
        self.send(req, what)
            .await?
            .json()
            .await
            .map_err(|e| rw_core::Error::upstream(PROVIDER, format!("{what}: invalid response: {e}")))
    }

    /// Tracked torrents, served from a short-lived cache.
    async fn account_torrents(&self) -> rw_core::Result<Vec<TorrentSummary>> {
        if let Some((at, list)) = self.account_cache.lock().as_ref() {
            if at.elapsed() < ACCOUNT_LIST_TTL {
                return Ok(list.clone());
            }
        }
        let list: Vec<TorrentSummary> = self
            .json(self.http.get(self.url("/torrents")).query(&[("limit", "100")]), "list torrents")
            .await?;
        *self.account_cache.lock() = Some((Instant::now(), list.clone()));
        Ok(list)
    }

    fn forget_account_list(&self) {
        *self.account_cache.lock() = None;
    }

    async fn find_tracked(&self, hash: &SourceHash) -> rw_core::Result<Option<String>> {
        let list = self.account_torrents().await?;
        Ok(list
            .into_iter()
            .find(|t| t.hash.eq_ignore_ascii_case(hash.as_str()) && !FATAL_STATUSES.contains(&t.status.as_str()))
            .map(|t| t.id))
    }

    async fn add_magnet(&self, hash: &SourceHash, name: Option<&str>) -> rw_core::Result<String> {
        let magnet = magnet_uri(hash, name);
        let added: AddMagnetResponse = self
            .json(self.http.post(self.url("/torrents/addMagnet")).form(&[("magnet", magnet)]), "add magnet")
            .await?;
        self.forget_account_list();
        Ok(added.id)
    }

    async fn info(&self, id: &str) -> rw_core::Result<TorrentInfo> {
        self.json(self.http.get(self.url(&format!("/torrents/info/{id}"))), "torrent info")
            .await
    }

    async fn select_files(&self, id: &str, file_id: u32) -> rw_core::Result<()> {
        self.send(
            self.http
                .post(self.url(&format!("/torrents/selectFiles/{id}")))
                .form(&[("files", file_id.to_string())]),
            "select files",
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> rw_core::Result<()> {
        self.send(self.http.delete(self.url(&format!("/torrents/delete/{id}"))), "delete torrent")
            .await?;
        self.forget_account_list();
        Ok(())
    }

    async fn unrestrict(&self, link: &str) -> rw_core::Result<UnrestrictResponse> {
        self.json(self.http.post(self.url("/unrestrict/link")).form(&[("link", link)]), "unrestrict")
            .await
    }

    /// Poll until the torrent is downloaded, failing fast on fatal statuses.
    async fn wait_ready(&self, id: &str) -> rw_core::Result<TorrentInfo> {
        self.wait_for(id, "ready", |info| info.status == "downloaded" && !info.links.is_empty())
            .await
    }

    /// Poll until magnet conversion has produced a file list.
    async fn wait_files(&self, id: &str) -> rw_core::Result<TorrentInfo> {
        self.wait_for(id, "listing files", |info| !info.files.is_empty()).await
    }

    async fn wait_for(
        &self,
        id: &str,
        what: &str,
        done: impl Fn(&TorrentInfo) -> bool,
    ) -> rw_core::Result<TorrentInfo> {
        let poll = async {
            loop {
                let info = self.info(id).await?;
                if done(&info) {
                    return Ok(info);
                }
                if FATAL_STATUSES.contains(&info.status.as_str()) {
                    return Err(rw_core::Error::upstream(PROVIDER, format!("torrent status {}", info.status)));
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        match tokio::time::timeout(self.ready_timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(rw_core::Error::Timeout(format!(
                "torrent {id} not {what} after {}s",
                self.ready_timeout.as_secs()
            ))),
        }
    }

    /// Everything after the torrent id is known. Separate so the caller can
    /// clean up a torrent it created when this fails.
    async fn reify_tracked(&self, id: &str, request: &ReifyRequest) -> rw_core::Result<ResolvedSource> {
        let candidate = &request.candidate;
        let mut info = self.info(id).await?;
        if info.files.is_empty() {
            tracing::debug!(id, status = %info.status, "Waiting for magnet conversion");
            info = self.wait_files(id).await?;
        }
        let hint = candidate.filename.as_deref().or(request.display_name.as_deref());
        let chosen = select_file(&info.files, hint, request.episode)
            .cloned()
            .ok_or_else(|| rw_core::Error::upstream(PROVIDER, "torrent lists no files"))?;

        if chosen.selected == 0 {
            self.select_files(id, chosen.id).await?;
        }
        if info.status != "downloaded" || chosen.selected == 0 {
            info = self.wait_ready(id).await?;
        }

        // Links follow the order of the selected files.
        let mut selected: Vec<&TorrentFile> = info.files.iter().filter(|f| f.selected == 1).collect();
        selected.sort_by_key(|f| f.id);
        let chosen_pos = selected.iter().position(|f| f.id == chosen.id).unwrap_or(0);
        let mut links = info.links.clone();
        if chosen_pos < links.len() {
            let link = links.remove(chosen_pos);
            links.insert(0, link);
        }

        let mut probed = Vec::new();
        for link in &links {
            match self.unrestrict(link).await {
                Ok(un) => {
                    if !probed.is_empty() && !rw_core::is_video_path(&un.filename) {
                        continue;
                    }
                    let verification = verify_url(&self.http, &un.download, self.verify_timeout).await;
                    tracing::debug!(hash = %candidate.info_hash, ?verification, filename = %un.filename, "Unrestricted link");
                    probed.push(ProbedLink {
                        url: un.download,
                        filename: un.filename,
                        verification,
                    });
                }
                Err(e) => tracing::warn!(hash = %candidate.info_hash, error = %e, "Unrestrict failed"),
            }
            if probed.len() >= 3 {
                break;
            }
        }

        let variants = order_variants(&probed);
        let Some((playable_url, fallback_urls)) = variants.split_first() else {
            return Err(rw_core::Error::upstream(PROVIDER, "no reachable link for torrent"));
        };
        let filename = probed
            .iter()
            .find(|p| p.verification != Verification::Dead)
            .map(|p| p.filename.clone())
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| chosen.basename().to_string());

        Ok(ResolvedSource {
            playable_url: playable_url.clone(),
            fallback_urls: fallback_urls.to_vec(),
            filename,
            source_hash: Some(candidate.info_hash.clone()),
            selected_file: Some(chosen.path.clone()),
        })
    }
}

#[async_trait]
impl Reifier for RealDebridClient {
    fn name(&self) -> &'static str {
        "real-debrid"
    }

    async fn reify(&self, request: &ReifyRequest) -> rw_core::Result<ResolvedSource> {
        if !self.is_configured() {
            return Err(rw_core::Error::Configuration("debrid token is not set".into()));
        }
        let hash = &request.candidate.info_hash;

        let (id, created) = match self.find_tracked(hash).await? {
            Some(id) => (id, false),
            None => {
                let name = Some(request.candidate.name.as_str()).filter(|n| !n.is_empty());
                (self.add_magnet(hash, name).await?, true)
            }
        };
        tracing::debug!(%hash, torrent_id = %id, created, "Reifying candidate");

        match self.reify_tracked(&id, request).await {
            Ok(source) => Ok(source),
            Err(e) => {
                if created {
                    if let Err(cleanup) = self.delete(&id).await {
                        tracing::warn!(%hash, torrent_id = %id, error = %cleanup, "Failed to delete torrent after failed resolve");
                    }
                }
                Err(e)
            }
        }
    }

    async fn verify(&self, url: &str) -> Verification {
        // Remux-wrapped URLs are checked through their input.
        let target = remux_input(url).unwrap_or_else(|| url.to_string());
        verify_url(&self.http, &target, self.verify_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: u32, path: &str, bytes: u64) -> TorrentFile {
        TorrentFile {
            id,
            path: path.into(),
            bytes,
            selected: 0,
        }
    }

    #[test]
    fn selection_prefers_hint_then_episode_then_largest_video() {
        let files = vec![
            file(1, "/Show/Show.S01E01.mkv", 900),
            file(2, "/Show/Show.S01E02.mkv", 800),
            file(3, "/Show/extras.zip", 5000),
        ];
        assert_eq!(select_file(&files, Some("Show.S01E02.mkv"), None).unwrap().id, 2);
        assert_eq!(select_file(&files, None, Some((1, 2))).unwrap().id, 2);
        assert_eq!(select_file(&files, None, Some((1, 9))).unwrap().id, 1);
        assert_eq!(select_file(&files, Some("missing.mkv"), None).unwrap().id, 1);

        let no_video = vec![file(1, "/a.nfo", 10), file(2, "/b.rar", 20)];
        assert_eq!(select_file(&no_video, None, None).unwrap().id, 2);
        assert!(select_file(&[], None, None).is_none());
    }

    #[test]
    fn software_prediction() {
        assert!(predicts_software_decode("https://x.download.real-debrid.com/d/ABC/file", "Film.mkv"));
        assert!(!predicts_software_decode("https://cdn.example/film.mp4", "film.mp4"));
        assert!(predicts_software_decode("https://abc.download.real-debrid.com/d/XYZ", ""));
        assert!(!predicts_software_decode("https://cdn.example/stream", ""));
    }

    #[test]
    fn ordering_verified_first_and_proxy_for_software() {
        let links = vec![
            ProbedLink {
                url: "https://cdn.example/a.mp4".into(),
                filename: "a.mp4".into(),
                verification: Verification::Uncertain,
            },
            ProbedLink {
                url: "https://cdn.example/b.mkv".into(),
                filename: "b.mkv".into(),
                verification: Verification::Verified,
            },
            ProbedLink {
                url: "https://cdn.example/c.mp4".into(),
                filename: "c.mp4".into(),
                verification: Verification::Dead,
            },
        ];
        let ordered = order_variants(&links);
        assert_eq!(ordered[0], remux_url("https://cdn.example/b.mkv"));
        assert_eq!(ordered[1], "https://cdn.example/b.mkv");
        assert_eq!(ordered[2], "https://cdn.example/a.mp4");
        assert!(!ordered.iter().any(|u| u.contains("c.mp4")));
    }

    #[tokio::test]
    async fn token_validation_reads_account() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("authorization", "Bearer good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 1,
                "username": "neo",
                "type": "premium",
                "expiration": "2030-01-01T00:00:00.000Z"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let good = RealDebridClient::new(&server.uri(), "good".into(), Duration::from_secs(2));
        let account = good.validate_token().await.unwrap();
        assert_eq!(account.username, "neo");
        assert!(account.is_premium());

        let bad = RealDebridClient::new(&server.uri(), "bad".into(), Duration::from_secs(2));
        let err = bad.validate_token().await.unwrap_err();
        assert_eq!(err.code(), "configuration_error");

        let unset = RealDebridClient::new(&server.uri(), " ".into(), Duration::from_secs(2));
        assert!(unset.validate_token().await.is_err());
    }

    #[test]
    fn remux_urls_are_encoded() {
        assert_eq!(remux_url("https://a/b c.mkv"), "/api/remux?input=https%3A%2F%2Fa%2Fb%20c.mkv");
        assert_eq!(remux_input(&remux_url("https://a/b c.mkv")).as_deref(), Some("https://a/b c.mkv"));
        assert_eq!(remux_input("https://a/b.mkv"), None);
    }
}
