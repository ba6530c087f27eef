//! Content identifiers and resolution keys.
//!
//! A [`ResolveKey`] is derived purely from the resolution parameters so the
//! same request always maps to the same cache row, session and in-flight
//! entry.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::media::{normalize_lang, Quality, AUTO_LANG};

/// What is being resolved: a movie, or one episode of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentId {
    Movie { tmdb_id: u64 },
    Episode { tmdb_id: u64, season: u32, episode: u32 },
}

impl ContentId {
    pub fn tmdb_id(&self) -> u64 {
        match self {
            Self::Movie { tmdb_id } | Self::Episode { tmdb_id, .. } => *tmdb_id,
        }
    }

    pub fn is_episode(&self) -> bool {
        matches!(self, Self::Episode { .. })
    }

    /// Season/episode pair for series content.
    pub fn episode(&self) -> Option<(u32, u32)> {
        match self {
            Self::Episode { season, episode, .. } => Some((*season, *episode)),
            Self::Movie { .. } => None,
        }
    }

    /// Key under which per-title preferences are stored. Episodes share the
    /// preference of their series.
    pub fn title_key(&self) -> String {
        match self {
            Self::Movie { tmdb_id } => format!("movie:{tmdb_id}"),
            Self::Episode { tmdb_id, .. } => format!("tv:{tmdb_id}"),
        }
    }

    /// Prefix shared by the cache keys of every resolution of this title
    /// (all languages and qualities; all episodes for a series).
    pub fn title_cache_prefix(&self) -> String {
        match self {
            Self::Movie { tmdb_id } => format!("movie:{tmdb_id}|"),
            Self::Episode { tmdb_id, .. } => format!("tv:{tmdb_id}:"),
        }
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Movie { tmdb_id } => write!(f, "movie:{tmdb_id}"),
            Self::Episode {
                tmdb_id,
                season,
                episode,
            } => write!(f, "tv:{tmdb_id}:s{season}e{episode}"),
        }
    }
}

/// Identity of one resolution: content, audio language and quality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolveKey {
    pub content: ContentId,
    pub audio_lang: String,
    pub quality: Option<Quality>,
}

impl ResolveKey {
    pub fn new(content: ContentId, audio_lang: &str, quality: Option<Quality>) -> Self {
        Self {
            content,
            audio_lang: normalize_lang(audio_lang),
            quality,
        }
    }

    pub fn is_auto_lang(&self) -> bool {
        self.audio_lang == AUTO_LANG
    }

    /// The same key with the audio language replaced by `auto`.
    pub fn as_auto(&self) -> Self {
        Self {
            content: self.content,
            audio_lang: AUTO_LANG.to_string(),
            quality: self.quality,
        }
    }

    /// Stable string form used as the primary key in every cache tier.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResolveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.quality {
            Some(q) => write!(f, "{}|{}|{q}", self.content, self.audio_lang),
            None => write!(f, "{}|{}|any", self.content, self.audio_lang),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_derived_from_parameters() {
        let a = ResolveKey::new(ContentId::Movie { tmdb_id: 603 }, "FRE", Some(Quality::Hd1080));
        let b = ResolveKey::new(ContentId::Movie { tmdb_id: 603 }, "fr", Some(Quality::Hd1080));
        assert_eq!(a.cache_key(), "movie:603|fr|1080p");
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn episode_key_and_title_key() {
        let content = ContentId::Episode {
            tmdb_id: 1399,
            season: 1,
            episode: 2,
        };
        let key = ResolveKey::new(content, "", None);
        assert_eq!(key.cache_key(), "tv:1399:s1e2|auto|any");
        assert!(key.is_auto_lang());
        assert_eq!(content.title_key(), "tv:1399");
        assert_eq!(content.episode(), Some((1, 2)));
        assert!(key.cache_key().starts_with(&content.title_cache_prefix()));
        assert!(!"tv:13990:s1e2|auto|any".starts_with(&content.title_cache_prefix()));
    }

    #[test]
    fn as_auto_keeps_content_and_quality() {
        let key = ResolveKey::new(ContentId::Movie { tmdb_id: 1 }, "de", Some(Quality::Hd720));
        let auto = key.as_auto();
        assert_eq!(auto.cache_key(), "movie:1|auto|720p");
    }
}
