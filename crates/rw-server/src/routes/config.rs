//! Effective configuration with secrets redacted.

use axum::extract::State;
use axum::Json;
use rw_core::config::Config;
use serde_json::Value;

use crate::context::AppContext;
use crate::error::AppError;

/// Provider fields that hold credentials. They are reported only as
/// `true`/`false` (set or not).
const SECRET_FIELDS: &[&str] = &["debrid_token", "tmdb_api_key", "opensubtitles_api_key"];

pub fn redacted(config: &Config) -> Result<Value, rw_core::Error> {
    let mut value = serde_json::to_value(config)
        .map_err(|e| rw_core::Error::Internal(format!("failed to serialize config: {e}")))?;
    if let Some(providers) = value.get_mut("providers").and_then(Value::as_object_mut) {
        for field in SECRET_FIELDS {
            if let Some(secret) = providers.get_mut(*field) {
                let set = secret.as_str().is_some_and(|s| !s.trim().is_empty());
                *secret = Value::Bool(set);
            }
        }
    }
    Ok(value)
}

/// GET /api/config
pub async fn get_config(State(ctx): State<AppContext>) -> Result<Json<Value>, AppError> {
    Ok(Json(redacted(&ctx.config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_become_booleans() {
        let mut config = Config::default();
        config.providers.debrid_token = Some("s3cret".into());
        config.providers.tmdb_api_key = None;

        let value = redacted(&config).unwrap();
        let text = value.to_string();
        assert!(!text.contains("s3cret"));
        assert_eq!(value["providers"]["debrid_token"], Value::Bool(true));
        assert_eq!(value["providers"]["tmdb_api_key"], Value::Bool(false));
        assert_eq!(value["server"]["port"], config.server.port);
    }
}
