//! On-demand HLS planning.
//!
//! The whole playlist is emitted up front from the probed duration so a seek
//! never needs a replan; segments are produced lazily by the transcode job.

use std::fmt::Write;

/// Fixed segmentation of a source of known duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HlsPlan {
    pub duration_secs: f64,
    pub segment_secs: f64,
}

impl HlsPlan {
    pub fn new(duration_secs: f64, segment_secs: u32) -> rw_core::Result<Self> {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(rw_core::Error::Probe(format!(
                "cannot plan HLS for duration {duration_secs}"
            )));
        }
        if segment_secs == 0 {
            return Err(rw_core::Error::Validation("segment duration must be positive".into()));
        }
        Ok(Self {
            duration_secs,
            segment_secs: segment_secs as f64,
        })
    }

    /// `ceil(duration / segment)`.
    pub fn segment_count(&self) -> u32 {
        (self.duration_secs / self.segment_secs).ceil() as u32
    }

    pub fn contains(&self, index: u32) -> bool {
        index < self.segment_count()
    }

    /// Start offset and length of one segment, or `None` past the end.
    pub fn segment_bounds(&self, index: u32) -> Option<(f64, f64)> {
        if !self.contains(index) {
            return None;
        }
        let start = index as f64 * self.segment_secs;
        let len = (self.duration_secs - start).min(self.segment_secs);
        Some((start, len))
    }

    /// Render a VOD media playlist listing every segment. `uri_for` maps a
    /// segment index to its URI.
    pub fn playlist(&self, uri_for: impl Fn(u32) -> String) -> String {
        let mut m3u = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
        let _ = writeln!(m3u, "#EXT-X-TARGETDURATION:{}", self.segment_secs.ceil() as u64);
        m3u.push_str("#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-PLAYLIST-TYPE:VOD\n");

        for index in 0..self.segment_count() {
            if let Some((_, len)) = self.segment_bounds(index) {
                let _ = writeln!(m3u, "#EXTINF:{len:.3},");
                m3u.push_str(&uri_for(index));
                m3u.push('\n');
            }
        }
        m3u.push_str("#EXT-X-ENDLIST\n");
        m3u
    }
}

/// File name for segment `index` inside a job's output directory.
pub fn segment_file_name(index: u32) -> String {
    format!("seg_{index:05}.ts")
}

/// Pattern handed to ffmpeg's segment muxer; must agree with
/// [`segment_file_name`].
pub const SEGMENT_PATTERN: &str = "seg_%05d.ts";
