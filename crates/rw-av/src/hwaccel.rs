//! Hardware encoder selection.
//!
//! Capabilities come from `ffmpeg -hide_banner -encoders`. The configured
//! mode is tried first; the transcode manager demotes a job to
//! [`HwAccelMode::Software`] after the first failure.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Encoding back-end for the video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwAccelMode {
    Software,
    VideoToolbox,
    Nvenc,
    Vaapi,
    Qsv,
}

impl HwAccelMode {
    /// Preference order when `auto` is configured.
    const AUTO_ORDER: [HwAccelMode; 4] = [Self::Nvenc, Self::VideoToolbox, Self::Qsv, Self::Vaapi];

    pub fn is_hardware(self) -> bool {
        self != Self::Software
    }

    /// H.264 encoder name for this mode.
    pub fn encoder(self) -> &'static str {
        match self {
            Self::Software => "libx264",
            Self::VideoToolbox => "h264_videotoolbox",
            Self::Nvenc => "h264_nvenc",
            Self::Vaapi => "h264_vaapi",
            Self::Qsv => "h264_qsv",
        }
    }

    /// Flags that must appear before `-i`.
    pub fn input_args(self) -> Vec<&'static str> {
        match self {
            Self::Software => vec![],
            Self::VideoToolbox => vec!["-hwaccel", "videotoolbox"],
            Self::Nvenc => vec!["-hwaccel", "cuda"],
            Self::Vaapi => vec!["-vaapi_device", "/dev/dri/renderD128"],
            Self::Qsv => vec!["-hwaccel", "qsv"],
        }
    }

    /// Encoder and quality flags following `-c:v`.
    pub fn output_args(self) -> Vec<&'static str> {
        match self {
            Self::Software => vec![
                "-preset", "veryfast", "-crf", "21", "-pix_fmt", "yuv420p", "-profile:v", "high",
            ],
            Self::VideoToolbox => vec!["-b:v", "8M", "-maxrate", "12M", "-profile:v", "high"],
            Self::Nvenc => vec!["-preset", "p4", "-rc", "vbr", "-cq", "23", "-b:v", "8M", "-maxrate", "12M"],
            Self::Vaapi => vec!["-vf", "format=nv12,hwupload", "-b:v", "8M", "-maxrate", "12M"],
            Self::Qsv => vec!["-preset", "veryfast", "-global_quality", "23", "-vf", "format=nv12"],
        }
    }
}

impl fmt::Display for HwAccelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Software => write!(f, "none"),
            Self::VideoToolbox => write!(f, "videotoolbox"),
            Self::Nvenc => write!(f, "nvenc"),
            Self::Vaapi => write!(f, "vaapi"),
            Self::Qsv => write!(f, "qsv"),
        }
    }
}

impl FromStr for HwAccelMode {
    type Err = rw_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "software" | "cpu" => Ok(Self::Software),
            "videotoolbox" => Ok(Self::VideoToolbox),
            "nvenc" | "cuda" => Ok(Self::Nvenc),
            "vaapi" => Ok(Self::Vaapi),
            "qsv" => Ok(Self::Qsv),
            other => Err(rw_core::Error::Validation(format!("unknown hw_accel mode '{other}'"))),
        }
    }
}

/// Hardware encoders the local ffmpeg build advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwCapabilities {
    pub available: BTreeSet<HwAccelMode>,
}

impl HwCapabilities {
    /// Parse the listing printed by `ffmpeg -encoders`.
    pub fn from_encoder_listing(listing: &str) -> Self {
        let mut available = BTreeSet::new();
        for line in listing.lines() {
            // " V....D h264_nvenc           NVIDIA NVENC H.264 encoder"
            let Some(name) = line.split_whitespace().nth(1) else {
                continue;
            };
            for mode in HwAccelMode::AUTO_ORDER {
                if name == mode.encoder() {
                    available.insert(mode);
                }
            }
        }
        Self { available }
    }

    pub fn supports(&self, mode: HwAccelMode) -> bool {
        mode == HwAccelMode::Software || self.available.contains(&mode)
    }

    /// Resolve a configured mode string (`none`, `auto`, or a named mode)
    /// into the mode a new job should start with.
    pub fn resolve(&self, configured: &str) -> HwAccelMode {
        if configured.trim().eq_ignore_ascii_case("auto") {
            return HwAccelMode::AUTO_ORDER
                .into_iter()
                .find(|m| self.available.contains(m))
                .unwrap_or(HwAccelMode::Software);
        }
        match configured.parse::<HwAccelMode>() {
            Ok(mode) if self.supports(mode) => mode,
            Ok(mode) => {
                tracing::debug!(%mode, "Configured hardware encoder not advertised by ffmpeg; using software");
                HwAccelMode::Software
            }
            Err(_) => HwAccelMode::Software,
        }
    }
}

/// Run `ffmpeg -encoders` and parse the hardware encoders it lists.
pub async fn probe_capabilities(tools: &ToolRegistry) -> rw_core::Result<HwCapabilities> {
    let ffmpeg = tools.require("ffmpeg")?;
    let listing = ToolCommand::new(&ffmpeg.path, Duration::from_secs(15))
        .with_args(["-hide_banner", "-encoders"])
        .run()
        .await?;
    tracing::debug!(elapsed_ms = listing.elapsed.as_millis() as u64, "Listed ffmpeg encoders");
    Ok(HwCapabilities::from_encoder_listing(&listing.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "Encoders:
 V..... = Video
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)
 V....D h264_vaapi           H.264/AVC (VAAPI) (codec h264)
 A....D aac                  AAC (Advanced Audio Coding)";

    #[test]
    fn parses_encoder_listing() {
        let caps = HwCapabilities::from_encoder_listing(LISTING);
        assert!(caps.supports(HwAccelMode::Nvenc));
        assert!(caps.supports(HwAccelMode::Vaapi));
        assert!(!caps.supports(HwAccelMode::Qsv));
        assert!(caps.supports(HwAccelMode::Software));
    }

    #[test]
    fn resolve_modes() {
        let caps = HwCapabilities::from_encoder_listing(LISTING);
        assert_eq!(caps.resolve("auto"), HwAccelMode::Nvenc);
        assert_eq!(caps.resolve("vaapi"), HwAccelMode::Vaapi);
        assert_eq!(caps.resolve("qsv"), HwAccelMode::Software);
        assert_eq!(caps.resolve("none"), HwAccelMode::Software);
        assert_eq!(caps.resolve("bogus"), HwAccelMode::Software);
        assert_eq!(HwCapabilities::default().resolve("auto"), HwAccelMode::Software);
    }

    #[test]
    fn encoder_names() {
        assert_eq!(HwAccelMode::Software.encoder(), "libx264");
        assert_eq!(HwAccelMode::VideoToolbox.encoder(), "h264_videotoolbox");
        assert!(HwAccelMode::Software.input_args().is_empty());
        assert_eq!(HwAccelMode::Nvenc.input_args(), vec!["-hwaccel", "cuda"]);
        assert!(HwAccelMode::Software.output_args().contains(&"-crf"));
        assert!(!HwAccelMode::Nvenc.output_args().contains(&"-crf"));
    }

    #[test]
    fn display_roundtrip() {
        for mode in [HwAccelMode::Software, HwAccelMode::Nvenc, HwAccelMode::Qsv] {
            assert_eq!(mode.to_string().parse::<HwAccelMode>().unwrap(), mode);
        }
    }
}
