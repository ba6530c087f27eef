//! Media-domain value types: resolution tiers, containers, info-hashes and
//! language codes.
//!
//! Enums serialize in lowercase and implement `Display` manually for a
//! consistent string representation in cache keys and query strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

// ---------------------------------------------------------------------------
// Quality
// ---------------------------------------------------------------------------

/// Vertical resolution tier of a video source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "480p")]
    Sd,
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Hd1080,
    #[serde(rename = "2160p")]
    Uhd2160,
}

impl Quality {
    /// Ordinal tier used for distance calculations (0 = SD).
    pub fn tier(self) -> i32 {
        match self {
            Self::Sd => 0,
            Self::Hd720 => 1,
            Self::Hd1080 => 2,
            Self::Uhd2160 => 3,
        }
    }

    /// Absolute number of tiers between two qualities.
    pub fn distance(self, other: Quality) -> i32 {
        (self.tier() - other.tier()).abs()
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sd => write!(f, "480p"),
            Self::Hd720 => write!(f, "720p"),
            Self::Hd1080 => write!(f, "1080p"),
            Self::Uhd2160 => write!(f, "2160p"),
        }
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "480p" | "480" | "sd" | "576p" => Ok(Self::Sd),
            "720p" | "720" | "hd" => Ok(Self::Hd720),
            "1080p" | "1080" | "fhd" | "1080i" => Ok(Self::Hd1080),
            "2160p" | "2160" | "4k" | "uhd" => Ok(Self::Uhd2160),
            other => Err(Error::Validation(format!("unknown quality '{other}'"))),
        }
    }
}

/// Parse an optional quality query parameter; `auto`, `any` and blank mean
/// "no preference".
pub fn parse_quality_pref(value: Option<&str>) -> crate::Result<Option<Quality>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("auto") || v.eq_ignore_ascii_case("any") => Ok(None),
        Some(v) => v.parse().map(Some),
    }
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// Container inferred from a filename or release title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Mkv,
    Avi,
    Wmv,
    Ts,
    M3u8,
    Webm,
    Mov,
}

impl Container {
    /// Infer a container from a trailing file extension.
    pub fn from_extension(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let path = lower.split(['?', '#']).next().unwrap_or_default();
        let ext = path.rsplit_once('.').map(|(_, ext)| ext)?;
        Some(match ext {
            "mp4" | "m4v" => Self::Mp4,
            "mkv" => Self::Mkv,
            "avi" => Self::Avi,
            "wmv" => Self::Wmv,
            "ts" | "m2ts" => Self::Ts,
            "m3u8" => Self::M3u8,
            "webm" => Self::Webm,
            "mov" => Self::Mov,
            _ => return None,
        })
    }

    /// Whether an HTML video element can usually play this container as-is.
    pub fn is_browser_playable(self) -> bool {
        matches!(self, Self::Mp4 | Self::Webm | Self::Mov)
    }

    /// Containers that push playback onto the remux proxy.
    pub fn needs_software_path(self) -> bool {
        matches!(self, Self::Mkv | Self::Avi | Self::Wmv | Self::Ts | Self::M3u8)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mp4 => write!(f, "mp4"),
            Self::Mkv => write!(f, "mkv"),
            Self::Avi => write!(f, "avi"),
            Self::Wmv => write!(f, "wmv"),
            Self::Ts => write!(f, "ts"),
            Self::M3u8 => write!(f, "m3u8"),
            Self::Webm => write!(f, "webm"),
            Self::Mov => write!(f, "mov"),
        }
    }
}

impl FromStr for Container {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(&format!("x.{}", s.trim().trim_start_matches('.')))
            .ok_or_else(|| Error::Validation(format!("unknown container '{s}'")))
    }
}

/// File extensions treated as video when picking files inside a torrent.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "m4v", "avi", "wmv", "ts", "m2ts", "webm", "mov", "mpg", "mpeg",
];

/// Whether a path ends in a known video extension.
pub fn is_video_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower
        .rsplit_once('.')
        .is_some_and(|(_, ext)| VIDEO_EXTENSIONS.contains(&ext))
}

// ---------------------------------------------------------------------------
// SourceHash
// ---------------------------------------------------------------------------

/// A 40-character hex BitTorrent info-hash, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceHash(String);

impl SourceHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SourceHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() == 40 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(trimmed.to_ascii_lowercase()))
        } else {
            Err(Error::Validation(format!("invalid info-hash '{trimmed}'")))
        }
    }
}

impl TryFrom<String> for SourceHash {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceHash> for String {
    fn from(hash: SourceHash) -> Self {
        hash.0
    }
}

impl fmt::Display for SourceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Languages
// ---------------------------------------------------------------------------

/// Audio language meaning "no explicit preference".
pub const AUTO_LANG: &str = "auto";

/// Normalize a language value to a lowercase ISO 639-1 code where known.
///
/// Three-letter codes and common English names map to their two-letter form;
/// unknown values are lowercased and passed through. Blank input yields
/// [`AUTO_LANG`].
pub fn normalize_lang(value: &str) -> String {
    let lower = value.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return AUTO_LANG.to_string();
    }
    let code = match lower.as_str() {
        "eng" | "english" => "en",
        "fre" | "fra" | "french" | "francais" | "français" => "fr",
        "spa" | "spanish" | "esp" | "espanol" | "español" => "es",
        "ger" | "deu" | "german" | "deutsch" => "de",
        "ita" | "italian" | "italiano" => "it",
        "por" | "portuguese" | "portugues" => "pt",
        "jpn" | "japanese" => "ja",
        "kor" | "korean" => "ko",
        "chi" | "zho" | "chinese" => "zh",
        "rus" | "russian" => "ru",
        "hin" | "hindi" => "hi",
        "ara" | "arabic" => "ar",
        "dut" | "nld" | "dutch" => "nl",
        "pol" | "polish" => "pl",
        "tur" | "turkish" => "tr",
        "swe" | "swedish" => "sv",
        other => other,
    };
    code.to_string()
}

/// Whether two language values refer to the same language after
/// normalization.
pub fn same_lang(a: &str, b: &str) -> bool {
    normalize_lang(a) == normalize_lang(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_parse_and_display() {
        assert_eq!("1080p".parse::<Quality>().unwrap(), Quality::Hd1080);
        assert_eq!("4K".parse::<Quality>().unwrap(), Quality::Uhd2160);
        assert_eq!(Quality::Hd720.to_string(), "720p");
        assert!("8k".parse::<Quality>().is_err());
    }

    #[test]
    fn quality_distance() {
        assert_eq!(Quality::Sd.distance(Quality::Uhd2160), 3);
        assert_eq!(Quality::Hd1080.distance(Quality::Hd1080), 0);
        assert!(Quality::Hd720 < Quality::Hd1080);
    }

    #[test]
    fn quality_pref_auto_is_none() {
        assert_eq!(parse_quality_pref(Some("auto")).unwrap(), None);
        assert_eq!(parse_quality_pref(None).unwrap(), None);
        assert_eq!(parse_quality_pref(Some("720p")).unwrap(), Some(Quality::Hd720));
    }

    #[test]
    fn quality_serde_uses_resolution_labels() {
        let json = serde_json::to_string(&Quality::Hd1080).unwrap();
        assert_eq!(json, r#""1080p""#);
    }

    #[test]
    fn container_from_extension() {
        assert_eq!(Container::from_extension("Movie.2020.MKV"), Some(Container::Mkv));
        assert_eq!(
            Container::from_extension("https://host/x/file.mp4?token=1"),
            Some(Container::Mp4)
        );
        assert_eq!(Container::from_extension("https://host/d/ABCDEF"), None);
        assert!(Container::Mp4.is_browser_playable());
        assert!(Container::Mkv.needs_software_path());
    }

    #[test]
    fn source_hash_validation() {
        let hash: SourceHash = "ABCDEF0123456789ABCDEF0123456789ABCDEF01".parse().unwrap();
        assert_eq!(hash.as_str(), "abcdef0123456789abcdef0123456789abcdef01");
        assert!("xyz".parse::<SourceHash>().is_err());
        let json = serde_json::to_string(&hash).unwrap();
        let back: SourceHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
        assert!(serde_json::from_str::<SourceHash>(r#""nothex""#).is_err());
    }

    #[test]
    fn language_normalization() {
        assert_eq!(normalize_lang("FRE"), "fr");
        assert_eq!(normalize_lang("English"), "en");
        assert_eq!(normalize_lang(""), AUTO_LANG);
        assert_eq!(normalize_lang("xx"), "xx");
        assert!(same_lang("spa", "es"));
    }

    #[test]
    fn video_paths() {
        assert!(is_video_path("Show/S01E01.mkv"));
        assert!(!is_video_path("Show/sample.nfo"));
    }
}
