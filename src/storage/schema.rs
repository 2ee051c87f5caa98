//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the crawl database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per target resource: the last page whose records were emitted
CREATE TABLE IF NOT EXISTS checkpoints (
    resource_id TEXT PRIMARY KEY,
    last_cursor INTEGER,
    records_emitted INTEGER NOT NULL DEFAULT 0,
    exhausted INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

-- Saved browser cookies per login account
CREATE TABLE IF NOT EXISTS sessions (
    account TEXT PRIMARY KEY,
    identity TEXT,
    cookies TEXT NOT NULL,
    created_at TEXT NOT NULL,
    saved_at TEXT NOT NULL
);

-- Emitted records, when the database is used as the record sink
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    origin TEXT NOT NULL,
    cursor INTEGER NOT NULL,
    kind TEXT NOT NULL,
    provenance TEXT NOT NULL,
    partial INTEGER NOT NULL DEFAULT 0,
    fields TEXT NOT NULL,
    emitted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_origin ON records(origin, cursor);
CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - Database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
