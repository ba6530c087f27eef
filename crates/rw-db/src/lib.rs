//! rw-db: persistent cache store.
//!
//! SQLite-backed storage with connection pooling, embedded migrations, row
//! models, and one query module per record kind (resolved streams, quick-start
//! results, metadata responses, playback sessions, source health, media
//! probes, title preferences). Each table is independently prunable.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
