//! rw-source: stream discovery, ranking and debrid reification.
//!
//! - [`indexer`] lists candidates for a title from a stream-addon indexer.
//! - [`release`] and [`tokenizer`] parse release names into ranking signals.
//! - [`ranking`] scores and orders candidates; [`health`] turns playback
//!   history into a bounded score term.
//! - [`debrid`] turns the chosen candidate into playable URLs.
//! - [`tmdb`] maps TMDB ids to the external ids the indexer uses.

pub mod candidate;
pub mod debrid;
pub mod health;
pub mod indexer;
pub mod magnet;
pub mod ranking;
pub mod release;
pub mod tmdb;
pub mod tokenizer;
pub mod verify;

pub use candidate::StreamCandidate;
pub use debrid::{DebridAccount, RealDebridClient, Reifier, ReifyRequest};
pub use health::health_score;
pub use indexer::{AddonIndexer, CandidateQuery, CandidateSource};
pub use ranking::{rank_candidates, RankRequest, RankedCandidate, ScoreBreakdown};
pub use release::{parse_release, plausible_match, ReleaseInfo};
pub use tmdb::{TitleDetails, TmdbClient};
pub use verify::{verify_url, Verification};
