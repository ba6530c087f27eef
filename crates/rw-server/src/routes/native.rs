//! Hand a stream to a locally installed native player.
//!
//! Mounted behind the loopback-only middleware: it launches a process on the
//! server host.

use std::process::Stdio;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rw_core::config::Config;
use rw_core::Error;
use serde::{Deserialize, Serialize};

use crate::context::AppContext;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRequest {
    /// Absolute URL, or a path on this server such as `/api/remux?...`.
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayResponse {
    pub launched: bool,
    pub pid: Option<u32>,
    pub url: String,
}

/// Turn a server-relative path into an absolute URL the player can open.
fn absolute_url(config: &Config, url: &str) -> Result<String, Error> {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(url.to_string());
    }
    if !url.starts_with('/') {
        return Err(Error::Validation(format!("unsupported player URL '{url}'")));
    }
    let base = match config.server.public_base_url.as_deref() {
        Some(base) if !base.trim().is_empty() => base.trim_end_matches('/').to_string(),
        _ => {
            let host = match config.server.host.as_str() {
                "0.0.0.0" | "::" | "" => "127.0.0.1",
                host => host,
            };
            format!("http://{host}:{}", config.server.port)
        }
    };
    Ok(format!("{base}{url}"))
}

/// POST /api/native/play
pub async fn play(
    State(ctx): State<AppContext>,
    Json(req): Json<PlayRequest>,
) -> Result<(StatusCode, Json<PlayResponse>), AppError> {
    let player = &ctx.config.native_player;
    let binary = player
        .binary_path
        .clone()
        .ok_or_else(|| Error::Configuration("native_player.binary_path is not set".into()))?;
    let url = absolute_url(&ctx.config, &req.url)?;

    let mut cmd = tokio::process::Command::new(&binary);
    cmd.args(&player.extra_args)
        .arg(&url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let mut child = cmd.spawn().map_err(|e| {
        Error::tool(
            binary.display().to_string(),
            format!("failed to launch native player: {e}"),
        )
    })?;
    let pid = child.id();
    tracing::info!(player = %binary.display(), pid = ?pid, title = ?req.title, %url, "Launched native player");

    // Reap the player when it exits so it never lingers as a zombie.
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => tracing::debug!(pid = ?pid, %status, "Native player exited"),
            Err(e) => tracing::warn!(pid = ?pid, error = %e, "Failed to wait for native player"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(PlayResponse {
            launched: true,
            pid,
            url,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_urls_use_local_address() {
        let mut config = Config::default();
        config.server.host = "0.0.0.0".into();
        config.server.port = 8787;
        assert_eq!(
            absolute_url(&config, "/api/remux?input=x").unwrap(),
            "http://127.0.0.1:8787/api/remux?input=x"
        );

        config.server.public_base_url = Some("https://media.lan/".into());
        assert_eq!(
            absolute_url(&config, "/api/remux?input=x").unwrap(),
            "https://media.lan/api/remux?input=x"
        );
        assert_eq!(absolute_url(&config, "https://cdn/a.mp4").unwrap(), "https://cdn/a.mp4");
        assert!(absolute_url(&config, "file:///etc/passwd").is_err());
    }
}
