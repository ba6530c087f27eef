//! Release-name parsing.
//!
//! Extracts the signals candidate ranking needs from indexer text: title
//! words, year, resolution, episode signatures, season packs, runtime and
//! audio-language tags. Fields are best-effort; a missing signal is simply
//! absent and contributes nothing to a score.

use std::collections::BTreeSet;

use rw_core::{normalize_lang, Quality};
use serde::Serialize;

use crate::tokenizer::{tokenize, SpannedToken, Token};

/// Structured signals parsed from one release name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    /// Lowercased title words preceding the first metadata token.
    pub title_tokens: Vec<String>,
    pub year: Option<u32>,
    pub quality: Option<Quality>,
    /// Every `(season, episode)` pair the name carries.
    pub episodes: Vec<(u32, u32)>,
    /// Season of a whole-season pack (a season marker without an episode).
    pub season_pack: Option<u32>,
    pub runtime_minutes: Option<u32>,
    /// ISO 639-1 audio languages tagged in the name.
    pub languages: BTreeSet<String>,
    pub multi_audio: bool,
    pub group: Option<String>,
}

impl ReleaseInfo {
    pub fn has_episode_signature(&self) -> bool {
        !self.episodes.is_empty()
    }

    pub fn matches_episode(&self, season: u32, episode: u32) -> bool {
        self.episodes.iter().any(|&(s, e)| s == season && e == episode)
    }
}

/// Parse a release name into [`ReleaseInfo`].
pub fn parse_release(input: &str) -> ReleaseInfo {
    let tokens = tokenize(input);
    let mut info = ReleaseInfo::default();

    extract_metadata(&tokens, &mut info);
    extract_title(&tokens, &mut info);
    extract_group(&tokens, &mut info);

    info
}

fn extract_metadata(tokens: &[SpannedToken<'_>], info: &mut ReleaseInfo) {
    let mut season_marker = None;

    for st in tokens {
        match &st.token {
            Token::Year(text) => {
                // A leading year is part of the title ("1917", "2012"); the
                // last later one is the release year.
                if st.span.start > 0 {
                    info.year = text.parse().ok().or(info.year);
                }
            }
            Token::Resolution(text) => {
                if info.quality.is_none() {
                    info.quality = text.parse().ok();
                }
            }
            Token::Uhd(_) => {
                info.quality.get_or_insert(Quality::Uhd2160);
            }
            Token::SeasonEpisode(text) => info.episodes.extend(parse_season_episode(text)),
            Token::CrossEpisode(text) => {
                if let Some(pair) = parse_cross_episode(text) {
                    info.episodes.push(pair);
                }
            }
            Token::Season(text) => {
                let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
                if season_marker.is_none() {
                    season_marker = digits.parse().ok();
                }
            }
            Token::Runtime(text) => {
                if info.runtime_minutes.is_none() {
                    info.runtime_minutes = parse_runtime(text);
                }
            }
            Token::Language(text) => {
                info.languages.insert(language_tag(text));
            }
            Token::MultiAudio(_) => info.multi_audio = true,
            _ => {}
        }
    }

    if info.episodes.is_empty() {
        info.season_pack = season_marker;
    }
}

/// Title words are everything before the first metadata token.
fn extract_title(tokens: &[SpannedToken<'_>], info: &mut ReleaseInfo) {
    for st in tokens {
        // A leading year belongs to the title ("1917", "2012").
        if st.token.is_metadata() && !(matches!(st.token, Token::Year(_)) && st.span.start == 0) {
            break;
        }
        match &st.token {
            Token::Word(text) | Token::Number(text) | Token::Year(text) | Token::Language(text) => {
                info.title_tokens.push(normalize_word(text));
            }
            _ => {}
        }
    }
    info.title_tokens.retain(|t| !t.is_empty());
}

/// The release group is the word after the last hyphen when nothing but a
/// file extension follows it.
fn extract_group(tokens: &[SpannedToken<'_>], info: &mut ReleaseInfo) {
    let Some(pos) = tokens.iter().rposition(|t| t.token == Token::Hyphen) else {
        return;
    };
    let rest = &tokens[pos + 1..];
    let Some(first) = rest.first() else {
        return;
    };
    let Token::Word(name) = first.token else {
        return;
    };
    let trailing_ok = rest[1..].iter().all(|t| {
        matches!(t.token, Token::Dot | Token::Bracket)
            || matches!(t.token, Token::Word(w) if rw_core::is_video_path(&format!("x.{w}")))
    });
    if trailing_ok {
        info.group = Some(name.to_string());
    }
}

fn parse_season_episode(text: &str) -> Vec<(u32, u32)> {
    let upper = text.to_ascii_uppercase();
    let mut parts = upper.trim_start_matches('S').split('E');
    let Some(season) = parts.next().and_then(|s| s.trim_matches([' ', '.']).parse().ok()) else {
        return Vec::new();
    };
    parts
        .filter_map(|p| p.trim_matches('-').parse().ok())
        .map(|episode| (season, episode))
        .collect()
}

fn parse_cross_episode(text: &str) -> Option<(u32, u32)> {
    let (season, episode) = text.split_once(['x', 'X'])?;
    Some((season.parse().ok()?, episode.parse().ok()?))
}

fn parse_runtime(text: &str) -> Option<u32> {
    let lower = text.to_ascii_lowercase().replace(' ', "");
    if let Some((hours, rest)) = lower.split_once('h') {
        let minutes: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        return Some(hours.parse::<u32>().ok()? * 60 + minutes.parse::<u32>().ok()?);
    }
    let minutes: String = lower.chars().take_while(|c| c.is_ascii_digit()).collect();
    minutes.parse().ok()
}

fn language_tag(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let code = match lower.as_str() {
        "truefrench" | "vff" | "vfq" | "vfi" | "vf2" | "vf" => "fr",
        "castellano" | "latino" => "es",
        "dublado" => "pt",
        other => return normalize_lang(other),
    };
    code.to_string()
}

/// Lowercase and strip apostrophes so "Schindler's" matches "schindlers".
pub fn normalize_word(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Normalized words of a free-form title, as compared against
/// [`ReleaseInfo::title_tokens`].
pub fn title_words(title: &str) -> Vec<String> {
    title
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(normalize_word)
        .filter(|w| !w.is_empty())
        .collect()
}

/// Whether every word of `title` appears among the release's title words.
pub fn title_matches(info: &ReleaseInfo, title: &str) -> bool {
    let wanted = title_words(title);
    !wanted.is_empty() && wanted.iter().all(|w| info.title_tokens.contains(w))
}

/// Whether a cached filename still plausibly belongs to the requested title:
/// its title words must match, and a year, when both sides carry one, must
/// agree.
pub fn plausible_match(filename: &str, title: Option<&str>, year: Option<u32>) -> bool {
    let info = parse_release(filename);
    let title_ok = match title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => title_matches(&info, title),
        None => true,
    };
    let year_ok = match (year, info.year) {
        (Some(wanted), Some(found)) => wanted == found,
        _ => true,
    };
    title_ok && year_ok
}

/// Languages carried as regional-indicator flag emoji (as indexers append
/// them to stream descriptions), mapped to ISO 639-1 codes.
pub fn flag_languages(text: &str) -> BTreeSet<String> {
    let mut langs = BTreeSet::new();
    let indicators: Vec<char> = text
        .chars()
        .filter(|c| ('\u{1F1E6}'..='\u{1F1FF}').contains(c))
        .map(|c| (b'A' + (c as u32 - 0x1F1E6) as u8) as char)
        .collect();
    for pair in indicators.chunks_exact(2) {
        let country: String = pair.iter().collect();
        let lang = match country.as_str() {
            "GB" | "US" => "en",
            "FR" => "fr",
            "ES" | "MX" => "es",
            "DE" => "de",
            "IT" => "it",
            "PT" | "BR" => "pt",
            "RU" => "ru",
            "JP" => "ja",
            "KR" => "ko",
            "IN" => "hi",
            "CN" => "zh",
            _ => continue,
        };
        langs.insert(lang.to_string());
    }
    langs
}
