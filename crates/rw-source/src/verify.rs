//! Lightweight reachability probes for resolved URLs.

use std::time::Duration;

use reqwest::header::RANGE;
use reqwest::StatusCode;
use serde::Serialize;

/// How confident a probe is that a URL serves the media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    /// Answered with a success status.
    Verified,
    /// Rejected the probe without proving the file is gone (405, 403,
    /// 5xx, timeout).
    Uncertain,
    /// Gone for good (404, 410, connection refused).
    Dead,
}

impl Verification {
    fn from_status(status: StatusCode) -> Self {
        if status.is_success() || status.is_redirection() {
            Self::Verified
        } else if matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE) {
            Self::Dead
        } else {
            Self::Uncertain
        }
    }

    fn from_error(err: &reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Dead
        } else {
            Self::Uncertain
        }
    }
}

/// `HEAD` first; when that is not conclusive, a one-byte ranged `GET`.
pub async fn verify_url(http: &reqwest::Client, url: &str, timeout: Duration) -> Verification {
    let head = match http.head(url).timeout(timeout).send().await {
        Ok(resp) => Verification::from_status(resp.status()),
        Err(e) => Verification::from_error(&e),
    };
    if head != Verification::Uncertain {
        return head;
    }

    let ranged = match http.get(url).header(RANGE, "bytes=0-0").timeout(timeout).send().await {
        Ok(resp) => Verification::from_status(resp.status()),
        Err(e) => Verification::from_error(&e),
    };
    tracing::debug!(url, ?ranged, "HEAD inconclusive, ranged GET probe");
    ranged
}
