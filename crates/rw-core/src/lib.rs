//! rw-core: shared types, errors and configuration.
//!
//! This crate is the foundational dependency for all other rw-* crates,
//! providing the unified error type, application configuration, media-domain
//! value types, resolution keys and the playback session/health records.

pub mod config;
pub mod error;
pub mod keys;
pub mod media;
pub mod playback;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use keys::*;
pub use media::*;
pub use playback::*;

/// Current wall-clock time in unix milliseconds. Every persisted expiry and
/// validation deadline uses this unit.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
