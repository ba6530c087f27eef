//! ffmpeg argument builders for every transcoder invocation.
//!
//! Builders are pure so the exact command lines can be asserted in tests;
//! spawning happens in [`crate::process`] and [`crate::command`].

use std::path::Path;

use crate::hls::SEGMENT_PATTERN;
use crate::hwaccel::HwAccelMode;
use crate::probe::is_remote;

fn base_args(input: &str) -> Vec<String> {
    let mut args = strings(["-hide_banner", "-nostdin", "-loglevel", "error"]);
    if is_remote(input) {
        args.extend(strings([
            "-reconnect",
            "1",
            "-reconnect_streamed",
            "1",
            "-reconnect_delay_max",
            "5",
        ]));
    }
    args
}

fn strings<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn audio_map(audio_index: Option<u32>) -> String {
    match audio_index {
        Some(i) => format!("0:{i}"),
        None => "0:a:0?".to_string(),
    }
}

fn aac_args(bitrate: &str) -> Vec<String> {
    strings(["-c:a", "aac", "-b:a", bitrate, "-ac", "2"])
}

fn secs(value: f64) -> String {
    format!("{value:.3}")
}

// ---------------------------------------------------------------------------
// Remux (live proxy)
// ---------------------------------------------------------------------------

/// Parameters for a streamed remux: video copied, audio re-encoded to AAC
/// with an optional offset filter, fragmented MP4 on stdout.
#[derive(Debug, Clone)]
pub struct RemuxArgs<'a> {
    pub input: &'a str,
    pub start_secs: Option<f64>,
    pub audio_index: Option<u32>,
    pub subtitle_index: Option<u32>,
    pub audio_filter: Option<&'a str>,
    pub audio_bitrate: &'a str,
}

impl RemuxArgs<'_> {
    pub fn build(&self) -> Vec<String> {
        let mut args = base_args(self.input);
        if let Some(start) = self.start_secs.filter(|s| *s > 0.0) {
            args.push("-ss".into());
            args.push(secs(start));
        }
        args.push("-i".into());
        args.push(self.input.to_string());
        args.extend(strings(["-map", "0:v:0"]));
        args.push("-map".into());
        args.push(audio_map(self.audio_index));
        if let Some(sub) = self.subtitle_index {
            args.push("-map".into());
            args.push(format!("0:{sub}"));
        }
        args.extend(strings(["-c:v", "copy"]));
        args.extend(aac_args(self.audio_bitrate));
        if let Some(filter) = self.audio_filter {
            args.push("-af".into());
            args.push(filter.to_string());
        }
        if self.subtitle_index.is_some() {
            args.extend(strings(["-c:s", "mov_text"]));
        } else {
            args.push("-sn".into());
        }
        args.extend(strings([
            "-movflags",
            "frag_keyframe+empty_moov+default_base_moof",
            "-f",
            "mp4",
            "pipe:1",
        ]));
        args
    }
}

// ---------------------------------------------------------------------------
// HLS
// ---------------------------------------------------------------------------

/// Parameters for a background HLS job writing numbered MPEG-TS segments.
#[derive(Debug, Clone)]
pub struct HlsJobArgs<'a> {
    pub input: &'a str,
    pub audio_index: Option<u32>,
    pub mode: HwAccelMode,
    pub segment_secs: u32,
    /// First segment to produce; earlier segments are skipped by seeking.
    pub start_index: u32,
    pub output_dir: &'a Path,
    pub audio_bitrate: &'a str,
}

impl HlsJobArgs<'_> {
    pub fn build(&self) -> Vec<String> {
        let mut args = base_args(self.input);
        args.extend(self.mode.input_args().into_iter().map(String::from));
        let start = self.start_index as f64 * self.segment_secs as f64;
        if start > 0.0 {
            args.push("-ss".into());
            args.push(secs(start));
        }
        args.push("-i".into());
        args.push(self.input.to_string());
        push_video_audio(&mut args, self.audio_index, self.mode, self.segment_secs, self.audio_bitrate);
        if start > 0.0 {
            args.push("-output_ts_offset".into());
            args.push(secs(start));
        }
        args.extend(strings(["-f", "segment", "-segment_format", "mpegts", "-reset_timestamps", "0"]));
        args.push("-segment_time".into());
        args.push(self.segment_secs.to_string());
        args.push("-segment_start_number".into());
        args.push(self.start_index.to_string());
        args.push(self.output_dir.join(SEGMENT_PATTERN).to_string_lossy().to_string());
        args
    }
}

/// Parameters for rendering exactly one segment to a file.
#[derive(Debug, Clone)]
pub struct SegmentArgs<'a> {
    pub input: &'a str,
    pub audio_index: Option<u32>,
    pub mode: HwAccelMode,
    pub start_secs: f64,
    pub duration_secs: f64,
    pub segment_secs: u32,
    pub output: &'a Path,
    pub audio_bitrate: &'a str,
}

impl SegmentArgs<'_> {
    pub fn build(&self) -> Vec<String> {
        let mut args = base_args(self.input);
        args.extend(self.mode.input_args().into_iter().map(String::from));
        if self.start_secs > 0.0 {
            args.push("-ss".into());
            args.push(secs(self.start_secs));
        }
        args.push("-i".into());
        args.push(self.input.to_string());
        args.push("-t".into());
        args.push(secs(self.duration_secs));
        push_video_audio(&mut args, self.audio_index, self.mode, self.segment_secs, self.audio_bitrate);
        args.push("-output_ts_offset".into());
        args.push(secs(self.start_secs));
        args.extend(strings(["-muxdelay", "0", "-f", "mpegts", "-y"]));
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

fn push_video_audio(args: &mut Vec<String>, audio_index: Option<u32>, mode: HwAccelMode, segment_secs: u32, bitrate: &str) {
    args.extend(strings(["-map", "0:v:0"]));
    args.push("-map".into());
    args.push(audio_map(audio_index));
    args.push("-c:v".into());
    args.push(mode.encoder().to_string());
    args.extend(mode.output_args().into_iter().map(String::from));
    args.push("-force_key_frames".into());
    args.push(format!("expr:gte(t,n_forced*{segment_secs})"));
    args.extend(aac_args(bitrate));
    args.extend(strings(["-sn", "-dn"]));
}

// ---------------------------------------------------------------------------
// Subtitles
// ---------------------------------------------------------------------------

/// Extract one subtitle stream to a WebVTT file.
pub fn subtitle_extract_args(input: &str, stream_index: u32, output: &Path) -> Vec<String> {
    let mut args = base_args(input);
    args.push("-i".into());
    args.push(input.to_string());
    args.push("-map".into());
    args.push(format!("0:{stream_index}"));
    args.extend(strings(["-c:s", "webvtt", "-f", "webvtt", "-y"]));
    args.push(output.to_string_lossy().to_string());
    args
}
