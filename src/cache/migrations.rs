use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

/// Bumped whenever the serialized fragment layout changes. A mismatch
/// drops every stored fragment.
pub const FRAGMENT_FORMAT: i64 = 1;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fragments (
            path TEXT PRIMARY KEY,
            hash TEXT NOT NULL,
            language TEXT NOT NULL,
            payload TEXT NOT NULL,
            stored INTEGER NOT NULL
        );
        COMMIT;
        ",
    )?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'fragment_format'",
            [],
            |row| row.get::<_, String>(0).map(|v| v.parse::<i64>().unwrap_or(0)),
        )
        .optional()?;

    if existing != Some(FRAGMENT_FORMAT) {
        if existing.is_some() {
            tracing::info!(
                "cache fragment format changed ({:?} -> {FRAGMENT_FORMAT}); dropping stored fragments",
                existing
            );
        }
        conn.execute("DELETE FROM fragments", [])?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('fragment_format', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [FRAGMENT_FORMAT.to_string()],
        )?;
    }

    Ok(())
}
