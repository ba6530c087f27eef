//! Sticky per-title language preferences.

use rusqlite::{Connection, OptionalExtension};
use rw_core::{Error, Result, TitlePreference};

use crate::models::title_preference_from_row;

pub fn get(conn: &Connection, title_key: &str) -> Result<Option<TitlePreference>> {
    conn.query_row(
        "SELECT title_key, audio_lang, subtitle_lang, updated_at FROM title_preferences WHERE title_key = ?1",
        [title_key],
        title_preference_from_row,
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))
}

pub fn upsert(conn: &Connection, pref: &TitlePreference) -> Result<()> {
    conn.execute(
        "INSERT INTO title_preferences (title_key, audio_lang, subtitle_lang, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(title_key) DO UPDATE SET
            audio_lang = excluded.audio_lang,
            subtitle_lang = excluded.subtitle_lang,
            updated_at = excluded.updated_at",
        rusqlite::params![pref.title_key, pref.audio_lang, pref.subtitle_lang, pref.updated_at],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

pub fn delete(conn: &Connection, title_key: &str) -> Result<bool> {
    super::delete_key(conn, "title_preferences", "title_key", title_key)
}

pub fn count(conn: &Connection) -> Result<i64> {
    super::count(conn, "title_preferences")
}
