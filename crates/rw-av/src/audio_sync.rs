//! Audio offset estimation and filter construction for the remux path.
//!
//! Positive offsets delay the audio, negative offsets advance it. The
//! automatic estimate compares the selected audio stream's start time with
//! the video's presentation start (its start time minus the B-frame reorder
//! lead) and is clamped to a configured bound.

use serde::Serialize;

use crate::probe::MediaProbe;

/// Bound on user-supplied offsets.
pub const MAX_MANUAL_SYNC_MS: i64 = 10_000;

/// Estimated corrections below this are noise and ignored.
const MIN_AUTO_SYNC_MS: i64 = 10;

/// Combined audio correction for one remux.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSync {
    pub manual_ms: i64,
    pub auto_ms: i64,
}

impl AudioSync {
    pub fn new(manual_ms: i64, auto_ms: i64) -> Self {
        Self {
            manual_ms: manual_ms.clamp(-MAX_MANUAL_SYNC_MS, MAX_MANUAL_SYNC_MS),
            auto_ms,
        }
    }

    pub fn total_ms(&self) -> i64 {
        self.manual_ms + self.auto_ms
    }

    /// ffmpeg `-af` graph for the total offset, or `None` when no correction
    /// is needed.
    pub fn filter(&self) -> Option<String> {
        audio_filter(self.total_ms())
    }
}

/// Estimate the automatic correction in milliseconds.
///
/// Returns 0 when `enabled` is false, when timing is unknown, or when the
/// estimate is below the noise floor. The result always lies within
/// `[-clamp_ms, clamp_ms]`.
pub fn estimate_auto_offset_ms(probe: &MediaProbe, audio_index: Option<u32>, enabled: bool, clamp_ms: i64) -> i64 {
    if !enabled || clamp_ms <= 0 {
        return 0;
    }
    let Some(video) = probe.video.as_ref() else {
        return 0;
    };
    let Some(video_start) = video.start_time else {
        return 0;
    };
    let audio = match audio_index {
        Some(index) => probe.audio(index),
        None => probe.pick_audio(None),
    };
    let Some(audio_start) = audio.and_then(|a| a.start_time) else {
        return 0;
    };

    let presentation_start = video_start - video.bframe_lead;
    let raw_ms = ((audio_start - presentation_start) * 1000.0).round();
    if !raw_ms.is_finite() {
        return 0;
    }
    let raw_ms = raw_ms as i64;
    if raw_ms.abs() < MIN_AUTO_SYNC_MS {
        return 0;
    }
    raw_ms.clamp(-clamp_ms, clamp_ms)
}

/// Build the filter graph for an offset: `adelay` for a delay, `atrim` plus
/// timestamp reset for an advance.
pub fn audio_filter(total_ms: i64) -> Option<String> {
    match total_ms {
        0 => None,
        ms if ms > 0 => Some(format!("adelay={ms}:all=1")),
        ms => Some(format!(
            "atrim=start={:.3},asetpts=PTS-STARTPTS",
            (-ms) as f64 / 1000.0
        )),
    }
}
