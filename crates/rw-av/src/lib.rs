//! # rw-av
//!
//! Media tooling for the reelway playback pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- locate ffmpeg and ffprobe and
//!   check their versions.
//! - **One-shot runs** ([`ToolCommand`]) -- bounded ffmpeg/ffprobe
//!   invocations whose output is collected in full.
//! - **Long-running processes** ([`ManagedProcess`]) -- transcoder children
//!   with stderr capture that die with their owner.
//! - **Probing** ([`FfprobeProber`]) -- stream layout and timing behind the
//!   [`MediaProber`] trait.
//! - **Transcode planning** ([`args`], [`hls`], [`hwaccel`], [`audio_sync`])
//!   -- ffmpeg command lines, HLS segmentation, encoder selection and audio
//!   offset correction.
//! - **Captions** ([`captions`]) -- subtitle decoding, SRT to WebVTT and
//!   embedded stream extraction.

pub mod args;
pub mod audio_sync;
pub mod captions;
pub mod command;
pub mod hls;
pub mod hwaccel;
pub mod probe;
pub mod process;
pub mod tools;

// ---- Re-exports for convenience ----

pub use args::{HlsJobArgs, RemuxArgs, SegmentArgs};
pub use audio_sync::{estimate_auto_offset_ms, AudioSync};
pub use captions::EXTERNAL_SUBTITLE_BASE;
pub use command::{ToolCommand, ToolOutput};
pub use hls::{segment_file_name, HlsPlan};
pub use hwaccel::{HwAccelMode, HwCapabilities};
pub use probe::{AudioStream, FfprobeProber, MediaProbe, MediaProber, SubtitleStream, VideoTiming};
pub use process::{ManagedProcess, StdoutMode};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
