//! Cache and job introspection.

use std::collections::BTreeMap;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::query;
use crate::cache::CacheStats;
use crate::context::AppContext;
use crate::error::AppError;
use crate::transcode::TranscodeSnapshot;

#[derive(Debug, Default, Deserialize)]
pub struct DebugQuery {
    #[serde(default)]
    pub clear: Option<String>,
}

impl DebugQuery {
    fn wants_clear(&self) -> bool {
        matches!(self.clear.as_deref().map(str::trim), Some("1") | Some("true") | Some("yes"))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugCacheResponse {
    /// Persistent rows removed by `?clear=1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared: Option<usize>,
    pub cache: CacheStats,
    pub sessions: BTreeMap<String, i64>,
    pub resolutions_in_flight: usize,
    pub transcode: TranscodeSnapshot,
}

/// GET /api/debug/cache[?clear=1]
pub async fn cache(
    State(ctx): State<AppContext>,
    params: Result<Query<DebugQuery>, QueryRejection>,
) -> Result<Json<DebugCacheResponse>, AppError> {
    let params = query(params)?;
    let cleared = if params.wants_clear() {
        Some(ctx.cache.clear()?)
    } else {
        None
    };

    Ok(Json(DebugCacheResponse {
        cleared,
        cache: ctx.cache.stats()?,
        sessions: ctx.sessions.summary()?.into_iter().collect(),
        resolutions_in_flight: ctx.resolver.in_flight(),
        transcode: ctx.transcode.snapshot(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_flag() {
        let q = |v: Option<&str>| DebugQuery {
            clear: v.map(String::from),
        };
        assert!(q(Some("1")).wants_clear());
        assert!(q(Some("true")).wants_clear());
        assert!(!q(Some("0")).wants_clear());
        assert!(!q(None).wants_clear());
    }
}
