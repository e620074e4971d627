//! Database schema definitions
//!
//! This module contains the SQL schema of the fingerprint database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track harvest runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site TEXT NOT NULL,
    search_tags TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Primary fingerprints, in insertion order per site
CREATE TABLE IF NOT EXISTS fingerprints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site TEXT NOT NULL,
    post_id TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    local_path TEXT,
    added_at TEXT NOT NULL,
    run_id INTEGER REFERENCES runs(id),
    UNIQUE(site, post_id)
);

CREATE INDEX IF NOT EXISTS idx_fingerprints_site ON fingerprints(site);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Gets the current schema version
pub fn get_schema_version() -> u32 {
    1
}
