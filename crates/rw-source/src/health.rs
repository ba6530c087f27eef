//! Source-health ranking adjustment.
//!
//! The score is confidence weighted: with few recorded plays it stays
//! small, so a single failure can never bury a source for good, while a
//! long, consistent history approaches the bound. The bound itself depends
//! on what kind of failures dominate: generic playback errors are weak
//! evidence, decode failures are strong evidence the file is broken.

use rw_core::SourceHealthStat;

/// Bound when every failure is a generic playback error (or there are
/// none).
pub const PLAYBACK_ERROR_BOUND: f64 = 2400.0;

/// Bound when every failure is a decode failure.
pub const DECODE_BOUND: f64 = 4400.0;

/// Attempts at which the score reaches half of its bound.
const CONFIDENCE_PIVOT: f64 = 3.0;

const ENDED_EARLY_WEIGHT: f64 = 0.6;

/// Bound for this history, between [`PLAYBACK_ERROR_BOUND`] and
/// [`DECODE_BOUND`].
fn bound(stat: &SourceHealthStat) -> f64 {
    let failures = stat.failures();
    if failures == 0 {
        return PLAYBACK_ERROR_BOUND;
    }
    let severity = (stat.decode_failures as f64 + ENDED_EARLY_WEIGHT * stat.ended_early_failures as f64)
        / failures as f64;
    PLAYBACK_ERROR_BOUND + (DECODE_BOUND - PLAYBACK_ERROR_BOUND) * severity
}

/// Ranking adjustment for a source with this history. Strictly inside
/// `(-bound, bound)`.
pub fn health_score(stat: &SourceHealthStat) -> i64 {
    let attempts = stat.attempts() as f64;
    if attempts == 0.0 {
        return 0;
    }
    let balance = (stat.successes as f64 - stat.failures() as f64) / attempts;
    let confidence = attempts / (attempts + CONFIDENCE_PIVOT);
    (balance * confidence * bound(stat)).round() as i64
}
