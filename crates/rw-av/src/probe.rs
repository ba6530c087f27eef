//! Media probing via ffprobe.
//!
//! [`FfprobeProber`] shells out to `ffprobe -print_format json -show_format
//! -show_streams` against a URL or path and maps the output into a
//! [`MediaProbe`]: audio and subtitle listings, duration, and the video
//! timing values used for automatic audio-sync.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use rw_core::{normalize_lang, same_lang};
use serde::{Deserialize, Serialize};

use crate::command::ToolCommand;

/// Subtitle codecs that can be converted to WebVTT as text.
const TEXT_SUBTITLE_CODECS: &[&str] = &[
    "subrip", "srt", "ass", "ssa", "webvtt", "mov_text", "text", "microdvd", "subviewer",
];

// ---------------------------------------------------------------------------
// Probe model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStream {
    /// Absolute stream index within the container.
    pub index: u32,
    pub codec: String,
    pub language: Option<String>,
    pub title: Option<String>,
    pub channels: Option<u32>,
    pub default: bool,
    /// Stream start time in seconds.
    pub start_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleStream {
    /// Absolute stream index within the container, or an external index at
    /// or above [`EXTERNAL_SUBTITLE_BASE`](crate::captions::EXTERNAL_SUBTITLE_BASE).
    pub index: u32,
    pub codec: String,
    pub language: Option<String>,
    pub title: Option<String>,
    pub default: bool,
    pub forced: bool,
    pub text_based: bool,
    /// Download URL for externally sourced tracks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
}

/// Video timing details used to estimate audio offsets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoTiming {
    pub codec: Option<String>,
    pub start_time: Option<f64>,
    pub frame_rate: Option<f64>,
    /// Decoder reorder delay introduced by B-frames, in seconds.
    pub bframe_lead: f64,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaProbe {
    pub duration_secs: Option<f64>,
    pub format_name: Option<String>,
    pub video: Option<VideoTiming>,
    pub audio_streams: Vec<AudioStream>,
    pub subtitle_streams: Vec<SubtitleStream>,
}

impl MediaProbe {
    pub fn audio(&self, index: u32) -> Option<&AudioStream> {
        self.audio_streams.iter().find(|a| a.index == index)
    }

    /// Pick the audio stream for a preferred language: the first exact
    /// language match (default-flagged first), else the default stream,
    /// else the first stream.
    pub fn pick_audio(&self, preferred_lang: Option<&str>) -> Option<&AudioStream> {
        if let Some(lang) = preferred_lang.filter(|l| *l != rw_core::AUTO_LANG) {
            let mut matches: Vec<&AudioStream> = self
                .audio_streams
                .iter()
                .filter(|a| a.language.as_deref().is_some_and(|l| same_lang(l, lang)))
                .collect();
            matches.sort_by_key(|a| !a.default);
            if let Some(first) = matches.first().copied() {
                return Some(first);
            }
        }
        self.audio_streams
            .iter()
            .find(|a| a.default)
            .or_else(|| self.audio_streams.first())
    }

    /// Text-based subtitle stream in `lang`, preferring non-forced tracks.
    pub fn pick_subtitle(&self, lang: &str) -> Option<&SubtitleStream> {
        let mut matches: Vec<&SubtitleStream> = self
            .subtitle_streams
            .iter()
            .filter(|s| s.text_based)
            .filter(|s| s.language.as_deref().is_some_and(|l| same_lang(l, lang)))
            .collect();
        matches.sort_by_key(|s| s.forced);
        matches.first().copied()
    }

    pub fn has_text_subtitle(&self, lang: &str) -> bool {
        self.pick_subtitle(lang).is_some()
    }
}

// ---------------------------------------------------------------------------
// Prober seam
// ---------------------------------------------------------------------------

/// Anything that can describe a media input's streams.
#[async_trait]
pub trait MediaProber: Send + Sync {
    fn name(&self) -> &'static str;

    async fn probe(&self, input: &str) -> rw_core::Result<MediaProbe>;
}

/// A prober backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self {
            ffprobe_path,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    async fn probe(&self, input: &str) -> rw_core::Result<MediaProbe> {
        let mut cmd = ToolCommand::new(&self.ffprobe_path, self.timeout).with_args(["-v", "error"]);
        if is_remote(input) {
            cmd = cmd.with_args(["-rw_timeout", "15000000"]);
        }
        let output = cmd
            .with_args(["-analyzeduration", "20000000", "-probesize", "20000000"])
            .with_args(["-print_format", "json", "-show_format", "-show_streams"])
            .with_arg(input)
            .run()
            .await?;
        parse_ffprobe_json(&output.stdout)
    }
}

pub(crate) fn is_remote(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    start_time: Option<String>,
    duration: Option<String>,
    channels: Option<u32>,
    has_b_frames: Option<u32>,
    #[serde(default)]
    disposition: FfprobeDisposition,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    default: u8,
    #[serde(default)]
    forced: u8,
    #[serde(default)]
    attached_pic: u8,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
    title: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Map raw ffprobe JSON into a [`MediaProbe`].
pub fn parse_ffprobe_json(json: &str) -> rw_core::Result<MediaProbe> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| rw_core::Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let mut probe = MediaProbe {
        duration_secs: parse_secs(output.format.duration.as_deref()),
        format_name: output.format.format_name,
        ..Default::default()
    };

    for stream in output.streams {
        match stream.codec_type.as_deref().unwrap_or("") {
            "video" if stream.disposition.attached_pic == 0 && probe.video.is_none() => {
                let frame_rate = stream
                    .avg_frame_rate
                    .as_deref()
                    .and_then(parse_frame_rate)
                    .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));
                let bframe_lead = match (stream.has_b_frames, frame_rate) {
                    (Some(frames), Some(fps)) if frames > 0 && fps > 0.0 => frames as f64 / fps,
                    _ => 0.0,
                };
                if probe.duration_secs.is_none() {
                    probe.duration_secs = parse_secs(stream.duration.as_deref());
                }
                probe.video = Some(VideoTiming {
                    codec: stream.codec_name,
                    start_time: parse_secs(stream.start_time.as_deref()),
                    frame_rate,
                    bframe_lead,
                    height: stream.height,
                });
            }
            "audio" => probe.audio_streams.push(AudioStream {
                index: stream.index,
                codec: stream.codec_name.unwrap_or_default(),
                language: clean_lang(stream.tags.language),
                title: stream.tags.title,
                channels: stream.channels,
                default: stream.disposition.default == 1,
                start_time: parse_secs(stream.start_time.as_deref()),
            }),
            "subtitle" => {
                let codec = stream.codec_name.unwrap_or_default();
                probe.subtitle_streams.push(SubtitleStream {
                    index: stream.index,
                    text_based: is_text_subtitle(&codec),
                    codec,
                    language: clean_lang(stream.tags.language),
                    title: stream.tags.title,
                    default: stream.disposition.default == 1,
                    forced: stream.disposition.forced == 1,
                    external_url: None,
                });
            }
            _ => {}
        }
    }

    Ok(probe)
}

pub fn is_text_subtitle(codec: &str) -> bool {
    TEXT_SUBTITLE_CODECS.contains(&codec.to_ascii_lowercase().as_str())
}

fn clean_lang(lang: Option<String>) -> Option<String> {
    lang.filter(|l| !l.is_empty() && l != "und")
        .map(|l| normalize_lang(&l))
}

fn parse_secs(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn parse_frame_rate(rate_str: &str) -> Option<f64> {
    let parsed = match rate_str.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate_str.parse().ok()?,
    };
    (parsed > 0.0).then_some(parsed)
}
