//! Playback progress reports.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use rw_core::{parse_quality_pref, ContentId, Error, PlaybackSession, ResolveKey, AUTO_LANG};
use serde::{Deserialize, Serialize};

use crate::context::AppContext;
use crate::error::AppError;
use crate::sessions::ProgressReport;

/// Report body. Players send it with `sendBeacon`, which arrives as
/// `text/plain`, so the body is parsed by hand regardless of content type.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressBody {
    pub tmdb_id: u64,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub season_number: Option<u32>,
    #[serde(default)]
    pub episode_number: Option<u32>,
    #[serde(default)]
    pub audio_lang: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default, alias = "position", alias = "currentTime")]
    pub position_secs: Option<f64>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

impl ProgressBody {
    fn into_report(self) -> Result<ProgressReport, Error> {
        let content = match (self.season_number, self.episode_number) {
            (Some(season), Some(episode)) if self.kind.as_deref() != Some("movie") => ContentId::Episode {
                tmdb_id: self.tmdb_id,
                season,
                episode,
            },
            _ => ContentId::Movie { tmdb_id: self.tmdb_id },
        };
        let lang = self
            .audio_lang
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(AUTO_LANG);
        let quality = parse_quality_pref(self.quality.as_deref())?;
        Ok(ProgressReport {
            key: ResolveKey::new(content, lang, quality),
            position_secs: self.position_secs.filter(|p| p.is_finite() && *p >= 0.0),
            event: self.event,
            message: self.message,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub tracked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<PlaybackSession>,
}

/// POST /api/session/progress
pub async fn report_progress(
    State(ctx): State<AppContext>,
    body: Bytes,
) -> Result<Json<ProgressResponse>, AppError> {
    let body: ProgressBody =
        serde_json::from_slice(&body).map_err(|e| Error::Validation(format!("invalid progress body: {e}")))?;
    let report = body.into_report()?;

    let sessions = ctx.sessions.clone();
    let session = tokio::task::spawn_blocking(move || sessions.report_progress(&report))
        .await
        .map_err(|e| Error::Internal(format!("progress task failed: {e}")))??;

    Ok(Json(ProgressResponse {
        tracked: session.is_some(),
        session,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_body_parses() {
        let body: ProgressBody = serde_json::from_str(
            r#"{"tmdbId":1399,"type":"tv","seasonNumber":1,"episodeNumber":2,"audioLang":"FRE","currentTime":12.5,"event":"stall"}"#,
        )
        .unwrap();
        let report = body.into_report().unwrap();
        let episode = ContentId::Episode {
            tmdb_id: 1399,
            season: 1,
            episode: 2,
        };
        assert_eq!(report.key, ResolveKey::new(episode, "fr", None));
        assert_eq!(report.position_secs, Some(12.5));
        assert_eq!(report.event.as_deref(), Some("stall"));
    }

    #[test]
    fn missing_language_means_auto() {
        let body: ProgressBody = serde_json::from_str(r#"{"tmdbId":603,"position":-4}"#).unwrap();
        let report = body.into_report().unwrap();
        assert!(report.key.is_auto_lang());
        assert_eq!(report.position_secs, None);
    }
}
