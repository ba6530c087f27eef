//! Unified error type for reelway.
//!
//! Every crate in the workspace returns [`Error`]. The server turns it into a
//! JSON body using [`Error::http_status`] and [`Error::code`].

use std::fmt;
use std::sync::Arc;

/// Failure of a resolution, playback or provider call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Lookup miss: a session, segment, preference or release.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "session", "segment").
        entity: String,
        /// Key that missed.
        id: String,
    },

    /// Bad query or body input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A required setting (provider credential, tool path) is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller is not allowed to use this endpoint.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// An upstream provider (indexer, debrid, subtitle service) failed or
    /// produced nothing usable.
    #[error("Upstream error [{provider}]: {message}")]
    Upstream {
        /// Which provider failed.
        provider: String,
        /// Human-readable error description.
        message: String,
    },

    /// A time budget was exhausted.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// SQLite or pool failure.
    #[error("Database error: {source}")]
    Database {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Filesystem or pipe failure.
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        tool: String,
        /// Ends with the tool's stderr tail when it exited non-zero.
        message: String,
    },

    /// Media probing failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// A failure produced by a shared (single-flight) computation and
    /// observed by more than one caller.
    #[error(transparent)]
    Shared(Arc<Error>),

    /// Broken invariant inside reelway itself.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Status code the API responds with.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Configuration(_) => 500,
            Error::Forbidden(_) => 403,
            Error::Upstream { .. } => 502,
            Error::Timeout(_) => 502,
            Error::Database { .. } => 500,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Probe(_) => 422,
            Error::Shared(inner) => inner.http_status(),
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Validation(_) => "validation_error",
            Error::Configuration(_) => "configuration_error",
            Error::Forbidden(_) => "forbidden",
            Error::Upstream { .. } => "upstream_error",
            Error::Timeout(_) => "timeout",
            Error::Database { .. } => "database_error",
            Error::Io { .. } => "io_error",
            Error::Tool { .. } => "tool_error",
            Error::Probe(_) => "probe_error",
            Error::Shared(inner) => inner.code(),
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Upstream`].
    pub fn upstream(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Upstream {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this failure came from a hardware encoder path, judged by the
    /// tool's stderr text. Only meaningful for [`Error::Tool`].
    pub fn is_hw_related(&self) -> bool {
        match self {
            Error::Tool { message, .. } => {
                let m = message.to_ascii_lowercase();
                [
                    "nvenc", "cuda", "vaapi", "qsv", "videotoolbox", "hwaccel",
                    "hwupload", "device creation failed", "no capable devices",
                ]
                .iter()
                .any(|needle| m.contains(needle))
            }
            Error::Shared(inner) => inner.is_hw_related(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
