//! Resolution endpoints.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use rw_core::{parse_quality_pref, Container, ContentId, Error, SourceHash};
use serde::Deserialize;

use super::{non_blank, preferences, query};
use crate::context::AppContext;
use crate::error::AppError;
use crate::resolve::{ResolveRequest, ResolveResponse, SourcesResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Movie,
    Tv,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveQuery {
    pub tmdb_id: Option<u64>,
    pub title: Option<String>,
    pub year: Option<u32>,
    pub imdb_id: Option<String>,
    pub runtime: Option<u32>,
    pub audio_lang: Option<String>,
    pub quality: Option<String>,
    pub subtitle_lang: Option<String>,
    pub source_hash: Option<String>,
    pub min_seeders: Option<u32>,
    /// Comma-separated container list, e.g. `mp4,mkv`.
    pub allowed_formats: Option<String>,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    /// `movie` or `tv`; only read by `/resolve/sources`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl ResolveQuery {
    fn content(&self, kind: Kind) -> Result<ContentId, Error> {
        let tmdb_id = self
            .tmdb_id
            .ok_or_else(|| Error::Validation("tmdbId is required".into()))?;
        match kind {
            Kind::Movie => Ok(ContentId::Movie { tmdb_id }),
            Kind::Tv => {
                let (Some(season), Some(episode)) = (self.season_number, self.episode_number) else {
                    return Err(Error::Validation(
                        "seasonNumber and episodeNumber are required for tv".into(),
                    ));
                };
                Ok(ContentId::Episode {
                    tmdb_id,
                    season,
                    episode,
                })
            }
        }
    }

    fn kind(&self) -> Result<Kind, Error> {
        match self.kind.as_deref().map(str::trim) {
            None | Some("") | Some("movie") => Ok(Kind::Movie),
            Some("tv") | Some("episode") | Some("series") => Ok(Kind::Tv),
            Some(other) => Err(Error::Validation(format!("unknown type '{other}'"))),
        }
    }

    /// Build the resolver request. Languages the caller leaves out fall back
    /// to the stored title preference.
    async fn into_request(self, ctx: &AppContext, kind: Kind) -> Result<ResolveRequest, Error> {
        let content = self.content(kind)?;
        let pref = preferences::stored(ctx, &content).await;

        let mut req = ResolveRequest::new(content);
        req.title = non_blank(self.title);
        req.year = self.year;
        req.imdb_id = non_blank(self.imdb_id);
        req.runtime_minutes = self.runtime;
        req.quality = parse_quality_pref(self.quality.as_deref())?;
        req.min_seeders = self.min_seeders;

        if let Some(lang) = non_blank(self.audio_lang).or_else(|| pref.as_ref().and_then(|p| p.audio_lang.clone())) {
            req.audio_lang = rw_core::normalize_lang(&lang);
        }
        req.subtitle_lang = non_blank(self.subtitle_lang)
            .or_else(|| pref.as_ref().and_then(|p| p.subtitle_lang.clone()))
            .map(|lang| rw_core::normalize_lang(&lang));

        req.source_hash = non_blank(self.source_hash)
            .map(|h| h.parse::<SourceHash>())
            .transpose()?;
        if let Some(formats) = non_blank(self.allowed_formats) {
            req.allowed_formats = formats
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::parse::<Container>)
                .collect::<Result<_, _>>()?;
        }
        Ok(req)
    }
}

/// GET /api/resolve/movie
pub async fn resolve_movie(
    State(ctx): State<AppContext>,
    params: Result<Query<ResolveQuery>, QueryRejection>,
) -> Result<Json<ResolveResponse>, AppError> {
    let req = query(params)?.into_request(&ctx, Kind::Movie).await?;
    tracing::info!(key = %req.key(), title = ?req.title, "Resolve requested");
    Ok(Json(ctx.resolver.resolve(req).await?))
}

/// GET /api/resolve/tv
pub async fn resolve_tv(
    State(ctx): State<AppContext>,
    params: Result<Query<ResolveQuery>, QueryRejection>,
) -> Result<Json<ResolveResponse>, AppError> {
    let req = query(params)?.into_request(&ctx, Kind::Tv).await?;
    tracing::info!(key = %req.key(), title = ?req.title, "Resolve requested");
    Ok(Json(ctx.resolver.resolve(req).await?))
}

/// GET /api/resolve/sources
pub async fn list_sources(
    State(ctx): State<AppContext>,
    params: Result<Query<ResolveQuery>, QueryRejection>,
) -> Result<Json<SourcesResponse>, AppError> {
    let params = query(params)?;
    let kind = params.kind()?;
    let req = params.into_request(&ctx, kind).await?;
    Ok(Json(ctx.resolver.sources(&req).await?))
}
