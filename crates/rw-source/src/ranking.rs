//! Candidate ranking.
//!
//! [`rank_candidates`] is a pure function of its inputs: the same candidates,
//! request and health history always produce the same order. A candidate's
//! score is the sum of independent terms, each recorded in a
//! [`ScoreBreakdown`] so previews can show why a source won.

use std::cmp::Ordering;
use std::collections::HashMap;

use rw_core::{Container, ContentId, Quality, SourceHash, SourceHealthStat, AUTO_LANG};
use serde::Serialize;

use crate::candidate::StreamCandidate;
use crate::health::health_score;
use crate::release::title_matches;

pub const DEFAULT_LIMIT: usize = 10;

const LANG_MATCH: i64 = 2500;
const LANG_CONFLICT: i64 = -1400;
const QUALITY_MATCH: i64 = 1400;
const QUALITY_TIER_PENALTY: i64 = -350;
const TITLE_AND_YEAR: i64 = 1800;
const TITLE_ONLY: i64 = 900;
const YEAR_ONLY: i64 = 300;
const WRONG_YEAR: i64 = -900;
const EPISODE_MATCH: i64 = 2800;
const SEASON_PACK: i64 = 600;
const WRONG_EPISODE: i64 = -3400;
const SEEDERS_CAP: i64 = 900;
const SEEDERS_SCALE: f64 = 180.0;

/// Everything ranking needs besides the candidates themselves.
#[derive(Debug, Clone)]
pub struct RankRequest {
    pub content: ContentId,
    pub title: Option<String>,
    pub year: Option<u32>,
    pub runtime_minutes: Option<u32>,
    /// Normalized audio language, or [`AUTO_LANG`].
    pub audio_lang: String,
    pub quality: Option<Quality>,
    pub min_seeders: u32,
    /// Allowed containers; empty allows all. Candidates whose container is
    /// unknown always pass.
    pub allowed_formats: Vec<Container>,
    pub forced_hash: Option<SourceHash>,
    pub limit: usize,
}

impl RankRequest {
    pub fn new(content: ContentId) -> Self {
        Self {
            content,
            title: None,
            year: None,
            runtime_minutes: None,
            audio_lang: AUTO_LANG.to_string(),
            quality: None,
            min_seeders: 0,
            allowed_formats: Vec::new(),
            forced_hash: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// Per-term contributions to a candidate's score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub language: i64,
    pub quality: i64,
    pub title_year: i64,
    pub runtime: i64,
    pub episode: i64,
    pub seeders: i64,
    pub health: i64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> i64 {
        self.language + self.quality + self.title_year + self.runtime + self.episode + self.seeders + self.health
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedCandidate {
    pub candidate: StreamCandidate,
    pub score: i64,
    pub breakdown: ScoreBreakdown,
}

/// Filter, score and order candidates.
///
/// Hard filters (seeders, container) run first, then the quality
/// pre-filter. A forced hash found in the filtered pool or, failing that,
/// in the full pool is moved to the front before the limit is applied.
pub fn rank_candidates(
    candidates: &[StreamCandidate],
    request: &RankRequest,
    health: &HashMap<SourceHash, SourceHealthStat>,
) -> Vec<RankedCandidate> {
    let score = |c: &StreamCandidate| {
        let breakdown = score_candidate(c, request, health.get(&c.info_hash));
        RankedCandidate {
            candidate: c.clone(),
            score: breakdown.total(),
            breakdown,
        }
    };

    let passes_hard_filters: Vec<&StreamCandidate> = candidates
        .iter()
        .filter(|c| c.seeders >= request.min_seeders)
        .filter(|c| match c.container {
            Some(container) if !request.allowed_formats.is_empty() => {
                request.allowed_formats.contains(&container)
            }
            _ => true,
        })
        .collect();

    let pool = quality_prefilter(passes_hard_filters, request.quality);
    let mut ranked: Vec<RankedCandidate> = pool.into_iter().map(&score).collect();
    ranked.sort_by(compare);

    if let Some(forced) = &request.forced_hash {
        if let Some(pos) = ranked.iter().position(|r| &r.candidate.info_hash == forced) {
            let promoted = ranked.remove(pos);
            ranked.insert(0, promoted);
        } else if let Some(c) = candidates.iter().find(|c| &c.info_hash == forced) {
            ranked.insert(0, score(c));
        }
    }

    ranked.truncate(request.limit.max(1));
    ranked
}

/// Exact-quality matches if any; else everything at or below the target;
/// else the whole pool.
fn quality_prefilter(pool: Vec<&StreamCandidate>, target: Option<Quality>) -> Vec<&StreamCandidate> {
    let Some(target) = target else {
        return pool;
    };
    let exact: Vec<_> = pool.iter().copied().filter(|c| c.quality == Some(target)).collect();
    if !exact.is_empty() {
        return exact;
    }
    let below: Vec<_> = pool
        .iter()
        .copied()
        .filter(|c| c.quality.is_some_and(|q| q.tier() <= target.tier()))
        .collect();
    if !below.is_empty() {
        return below;
    }
    pool
}

fn compare(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.candidate.seeders.cmp(&a.candidate.seeders))
        .then_with(|| a.candidate.info_hash.as_str().cmp(b.candidate.info_hash.as_str()))
}

pub fn score_candidate(c: &StreamCandidate, request: &RankRequest, health: Option<&SourceHealthStat>) -> ScoreBreakdown {
    ScoreBreakdown {
        language: language_term(c, &request.audio_lang),
        quality: quality_term(c.quality, request.quality),
        title_year: title_year_term(c, request.title.as_deref(), request.year),
        runtime: match request.content {
            ContentId::Movie { .. } => runtime_term(c.release.runtime_minutes, request.runtime_minutes),
            ContentId::Episode { .. } => 0,
        },
        episode: match request.content.episode() {
            Some((season, episode)) => episode_term(c, season, episode),
            None => 0,
        },
        seeders: seeders_term(c.seeders),
        health: health.map(health_score).unwrap_or(0),
    }
}

fn language_term(c: &StreamCandidate, wanted: &str) -> i64 {
    if wanted == AUTO_LANG {
        return 0;
    }
    let langs = &c.release.languages;
    let conflicts = langs.iter().filter(|l| l.as_str() != wanted).count() as i64;
    let matched = if langs.contains(wanted) { LANG_MATCH } else { 0 };
    matched + LANG_CONFLICT * conflicts
}

fn quality_term(found: Option<Quality>, wanted: Option<Quality>) -> i64 {
    match (found, wanted) {
        (Some(found), Some(wanted)) if found == wanted => QUALITY_MATCH,
        (Some(found), Some(wanted)) => QUALITY_TIER_PENALTY * found.distance(wanted) as i64,
        _ => 0,
    }
}

fn title_year_term(c: &StreamCandidate, title: Option<&str>, year: Option<u32>) -> i64 {
    let title_hit = title.is_some_and(|t| title_matches(&c.release, t));
    let (year_hit, year_wrong) = match (year, c.release.year) {
        (Some(wanted), Some(found)) => (wanted == found, wanted != found),
        _ => (false, false),
    };
    match (title_hit, year_hit) {
        (true, true) => TITLE_AND_YEAR,
        (true, false) => TITLE_ONLY,
        (false, true) => YEAR_ONLY,
        (false, false) if year_wrong => WRONG_YEAR,
        (false, false) => 0,
    }
}

fn runtime_term(found: Option<u32>, wanted: Option<u32>) -> i64 {
    let (Some(found), Some(wanted)) = (found, wanted) else {
        return 0;
    };
    if wanted == 0 {
        return 0;
    }
    let delta = (found as f64 - wanted as f64).abs() / wanted as f64;
    match delta {
        d if d <= 0.06 => 420,
        d if d <= 0.12 => 120,
        d if d <= 0.20 => 0,
        _ => -600,
    }
}

fn episode_term(c: &StreamCandidate, season: u32, episode: u32) -> i64 {
    let release = &c.release;
    if release.matches_episode(season, episode) {
        EPISODE_MATCH
    } else if release.has_episode_signature() {
        WRONG_EPISODE
    } else if release.season_pack == Some(season) {
        SEASON_PACK
    } else {
        0
    }
}

/// `min(900, round(180 * ln(1 + seeders)))`.
pub fn seeders_term(seeders: u32) -> i64 {
    let raw = (SEEDERS_SCALE * (1.0 + seeders as f64).ln()).round() as i64;
    raw.min(SEEDERS_CAP)
}
