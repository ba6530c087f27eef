//! Subtitle text handling: decoding downloaded files, SRT to WebVTT
//! conversion and extraction of embedded text streams.

use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use flate2::read::GzDecoder;
use regex::Regex;

use crate::args::subtitle_extract_args;
use crate::command::ToolCommand;

/// External subtitle tracks are numbered from here so they never collide
/// with container stream indices.
pub const EXTERNAL_SUBTITLE_BASE: u32 = 10_000;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:(\d{1,2}):)?(\d{1,2}):(\d{2})[,.](\d{1,3})").expect("valid regex")
});

static OVERRIDE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\\[^}]*\}").expect("valid regex"));

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Decode a downloaded subtitle file into text, inflating gzip payloads
/// first.
pub fn decode_subtitle_bytes(bytes: &[u8]) -> rw_core::Result<String> {
    if is_gzip(bytes) {
        let mut inflated = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut inflated)
            .map_err(|e| rw_core::Error::upstream("subtitles", format!("invalid gzip payload: {e}")))?;
        return Ok(decode_text(&inflated));
    }
    Ok(decode_text(bytes))
}

/// Byte-order-mark aware text decoding with a Latin-1 fallback for files
/// that are not valid UTF-8.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes.chunks_exact(2).map(|c| unit([c[0], c[1]])).collect();
    String::from_utf16_lossy(&units)
}

fn normalize_timestamp(caps: &regex::Captures<'_>) -> String {
    let hours: u32 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    let minutes = &caps[2];
    let seconds = &caps[3];
    let millis = format!("{:0<3}", &caps[4]);
    format!("{hours:02}:{minutes:0>2}:{seconds}.{millis}")
}

/// Convert SubRip (or loosely formatted WebVTT) text into WebVTT.
pub fn srt_to_vtt(text: &str) -> String {
    let text = text.trim_start_matches('\u{feff}').replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::from("WEBVTT\n\n");

    let body = match text.strip_prefix("WEBVTT") {
        // Drop the existing header block, keep everything after it.
        Some(rest) => rest.split_once("\n\n").map(|(_, cues)| cues).unwrap_or(""),
        None => text.as_str(),
    };

    for line in body.lines() {
        if line.contains("-->") {
            out.push_str(&TIMESTAMP_RE.replace_all(line, |caps: &regex::Captures<'_>| normalize_timestamp(caps)));
        } else {
            out.push_str(&OVERRIDE_TAG_RE.replace_all(line, ""));
        }
        out.push('\n');
    }
    out
}

/// Decode and convert a downloaded subtitle file in one step.
pub fn to_webvtt(bytes: &[u8]) -> rw_core::Result<String> {
    let text = decode_subtitle_bytes(bytes)?;
    if !text.contains("-->") {
        return Err(rw_core::Error::upstream("subtitles", "file contains no cues"));
    }
    Ok(srt_to_vtt(&text))
}

/// Extract an embedded text subtitle stream to a WebVTT file.
pub async fn extract_subtitle(ffmpeg: &Path, input: &str, stream_index: u32, output: &Path) -> rw_core::Result<()> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    ToolCommand::new(ffmpeg, Duration::from_secs(180))
        .with_args(subtitle_extract_args(input, stream_index, output))
        .run()
        .await?;
    tracing::debug!(stream_index, output = %output.display(), "Extracted subtitle stream");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const SRT: &str = "1\r\n00:00:01,500 --> 00:00:03,25\r\n{\\an8}Hello there\r\n\r\n2\r\n0:00:04,000 --> 0:00:05,000\r\nGeneral Kenobi\r\n";

    #[test]
    fn converts_srt() {
        let vtt = srt_to_vtt(SRT);
        assert!(vtt.starts_with("WEBVTT\n\n"));
        assert!(vtt.contains("00:00:01.500 --> 00:00:03.250"));
        assert!(vtt.contains("00:00:04.000 --> 00:00:05.000"));
        assert!(vtt.contains("\nHello there\n"));
        assert!(!vtt.contains("{\\an8}"));
        assert!(!vtt.contains('\r'));
    }

    #[test]
    fn existing_vtt_keeps_single_header() {
        let vtt = srt_to_vtt("WEBVTT\nKind: captions\n\n00:01.000 --> 00:02.000\nHi\n");
        assert_eq!(vtt.matches("WEBVTT").count(), 1);
        assert!(vtt.contains("00:00:01.000 --> 00:00:02.000"));
        assert!(!vtt.contains("Kind:"));
    }

    #[test]
    fn inflates_gzip() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(SRT.as_bytes()).unwrap();
        let gz = enc.finish().unwrap();
        assert!(is_gzip(&gz));
        let vtt = to_webvtt(&gz).unwrap();
        assert!(vtt.contains("General Kenobi"));
    }

    #[test]
    fn decodes_boms_and_latin1() {
        assert_eq!(decode_text(&[0xEF, 0xBB, 0xBF, b'h', b'i']), "hi");
        assert_eq!(decode_text(&[0xFF, 0xFE, b'h', 0, b'i', 0]), "hi");
        assert_eq!(decode_text(&[0xFE, 0xFF, 0, b'h', 0, b'i']), "hi");
        // "café" in Latin-1
        assert_eq!(decode_text(&[b'c', b'a', b'f', 0xE9]), "café");
    }

    #[test]
    fn rejects_files_without_cues() {
        assert!(to_webvtt(b"<html>rate limited</html>").is_err());
    }
}
