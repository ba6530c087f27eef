//! Sticky per-title language preferences.
//!
//! A stored preference fills in `audioLang`/`subtitleLang` for resolve
//! requests that leave them out. Changing or clearing it drops every cached
//! resolution of the title.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use rw_core::{ContentId, Error, TitlePreference};
use rw_db::queries;
use serde::Deserialize;

use super::{non_blank, query};
use crate::context::AppContext;
use crate::error::AppError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleQuery {
    pub tmdb_id: Option<u64>,
    /// `movie` (default) or `tv`. Series preferences apply to every episode.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceBody {
    pub tmdb_id: u64,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub audio_lang: Option<String>,
    #[serde(default)]
    pub subtitle_lang: Option<String>,
}

fn title_key(tmdb_id: Option<u64>, kind: Option<&str>) -> Result<(String, String), Error> {
    let tmdb_id = tmdb_id.ok_or_else(|| Error::Validation("tmdbId is required".into()))?;
    let content = match kind.map(str::trim) {
        None | Some("") | Some("movie") => ContentId::Movie { tmdb_id },
        Some("tv") => ContentId::Episode {
            tmdb_id,
            season: 0,
            episode: 0,
        },
        Some(other) => return Err(Error::Validation(format!("unknown type '{other}'"))),
    };
    Ok((content.title_key(), content.title_cache_prefix()))
}

/// Stored preference for a title; lookup failures count as none.
pub(crate) async fn stored(ctx: &AppContext, content: &ContentId) -> Option<TitlePreference> {
    let key = content.title_key();
    let lookup = key.clone();
    match ctx.with_db(move |conn| queries::title_preferences::get(conn, &lookup)).await {
        Ok(pref) => pref,
        Err(e) => {
            tracing::warn!(title = %key, error = %e, "Failed to read title preference");
            None
        }
    }
}

/// GET /api/title/preferences
pub async fn get_preference(
    State(ctx): State<AppContext>,
    params: Result<Query<TitleQuery>, QueryRejection>,
) -> Result<Json<TitlePreference>, AppError> {
    let params = query(params)?;
    let (key, _) = title_key(params.tmdb_id, params.kind.as_deref())?;
    let lookup = key.clone();
    let pref = ctx
        .with_db(move |conn| queries::title_preferences::get(conn, &lookup))
        .await?
        .ok_or_else(|| Error::not_found("preference", &key))?;
    Ok(Json(pref))
}

/// POST /api/title/preferences
pub async fn set_preference(
    State(ctx): State<AppContext>,
    Json(body): Json<PreferenceBody>,
) -> Result<Json<TitlePreference>, AppError> {
    let (key, prefix) = title_key(Some(body.tmdb_id), body.kind.as_deref())?;
    let pref = TitlePreference {
        title_key: key.clone(),
        audio_lang: non_blank(body.audio_lang).map(|l| rw_core::normalize_lang(&l)),
        subtitle_lang: non_blank(body.subtitle_lang).map(|l| rw_core::normalize_lang(&l)),
        updated_at: rw_core::now_ms(),
    };

    let stored = pref.clone();
    let previous = ctx
        .with_db(move |conn| {
            let previous = queries::title_preferences::get(conn, &stored.title_key)?;
            queries::title_preferences::upsert(conn, &stored)?;
            Ok(previous)
        })
        .await?;

    let changed = previous
        .map(|p| p.audio_lang != pref.audio_lang || p.subtitle_lang != pref.subtitle_lang)
        .unwrap_or(true);
    if changed {
        let dropped = ctx.cache.invalidate_title(&prefix);
        tracing::info!(
            title = %key,
            audio = ?pref.audio_lang,
            subtitle = ?pref.subtitle_lang,
            dropped,
            "Title preference changed"
        );
    }
    Ok(Json(pref))
}

/// DELETE /api/title/preferences
pub async fn delete_preference(
    State(ctx): State<AppContext>,
    params: Result<Query<TitleQuery>, QueryRejection>,
) -> Result<StatusCode, AppError> {
    let params = query(params)?;
    let (key, prefix) = title_key(params.tmdb_id, params.kind.as_deref())?;
    let doomed = key.clone();
    if !ctx.with_db(move |conn| queries::title_preferences::delete(conn, &doomed)).await? {
        return Err(Error::not_found("preference", &key).into());
    }
    let dropped = ctx.cache.invalidate_title(&prefix);
    tracing::info!(title = %key, dropped, "Title preference cleared");
    Ok(StatusCode::NO_CONTENT)
}
