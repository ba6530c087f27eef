//! Stream candidates as reported by an indexer.

use std::sync::LazyLock;

use regex::Regex;
use rw_core::{Container, Quality, SourceHash};
use serde::Serialize;

use crate::release::{flag_languages, parse_release, ReleaseInfo};

static SEEDERS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"👤\s*(\d+)").expect("valid regex"));

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)💾\s*([\d.,]+)\s*(TB|GB|MB|KB)").expect("valid regex")
});

/// One discovered source. Ephemeral: produced per discovery call and never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamCandidate {
    pub info_hash: SourceHash,
    /// Release name (first line of the indexer's description).
    pub name: String,
    /// Full description text as reported.
    pub title: String,
    pub seeders: u32,
    pub size_bytes: Option<u64>,
    pub quality: Option<Quality>,
    pub container: Option<Container>,
    pub release_group: Option<String>,
    /// File name the indexer says holds the content, used as a file
    /// selection hint by the reifier.
    pub filename: Option<String>,
    pub file_idx: Option<u32>,
    #[serde(skip)]
    pub release: ReleaseInfo,
}

impl StreamCandidate {
    /// Build a candidate from indexer description text.
    ///
    /// The text is the multi-line form stream addons use: release name on
    /// the first line, an optional file name, then a stats line carrying
    /// seeders and size, then optional language flags.
    pub fn from_description(
        info_hash: SourceHash,
        quality_label: Option<&str>,
        text: &str,
        filename_hint: Option<String>,
        file_idx: Option<u32>,
    ) -> Self {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let name = lines.next().unwrap_or_default().to_string();
        let file_line = lines
            .next()
            .filter(|l| rw_core::is_video_path(l))
            .map(str::to_string);
        let filename = filename_hint.or(file_line);

        let mut release = parse_release(&name);
        if let Some(file) = &filename {
            let from_file = parse_release(file);
            if release.episodes.is_empty() {
                release.episodes = from_file.episodes;
            }
            release.languages.extend(from_file.languages);
            release.quality = release.quality.or(from_file.quality);
        }
        release.languages.extend(flag_languages(text));

        let label_quality = quality_label.and_then(quality_from_label);
        let quality = release.quality.or(label_quality);

        let container = filename
            .as_deref()
            .and_then(Container::from_extension)
            .or_else(|| Container::from_extension(&name));

        Self {
            info_hash,
            seeders: parse_seeders(text),
            size_bytes: parse_size(text),
            quality,
            container,
            release_group: release.group.clone(),
            filename,
            file_idx,
            name,
            title: text.to_string(),
            release,
        }
    }

    /// Minimal candidate for tests and callers that only know a name.
    pub fn named(info_hash: SourceHash, name: &str, seeders: u32) -> Self {
        let mut candidate = Self::from_description(info_hash, None, name, None, None);
        candidate.seeders = seeders;
        candidate
    }
}

/// Quality from an addon's label such as `"Torrentio\n4k"` or `"1080p HDR"`.
fn quality_from_label(label: &str) -> Option<Quality> {
    label
        .split(|c: char| c.is_whitespace() || c == '|')
        .find_map(|word| word.parse::<Quality>().ok())
}

pub fn parse_seeders(text: &str) -> u32 {
    SEEDERS_RE
        .captures(text)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0)
}

pub fn parse_size(text: &str) -> Option<u64> {
    let caps = SIZE_RE.captures(text)?;
    let value: f64 = caps[1].replace(',', ".").parse().ok()?;
    let multiplier = match caps[2].to_ascii_uppercase().as_str() {
        "TB" => 1u64 << 40,
        "GB" => 1 << 30,
        "MB" => 1 << 20,
        _ => 1 << 10,
    };
    Some((value * multiplier as f64) as u64)
}
