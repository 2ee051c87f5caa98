//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the checkpoint store,
//! the session store and the record sink.

use crate::browser::BrowserCookie;
use crate::crawler::Cursor;
use crate::output::{Record, RecordSink, SinkError};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CheckpointStore, SessionStore, StoreError, StoreResult};
use crate::storage::{Checkpoint, StoredSession};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StoreError)` - Failed to open database
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Counts stored records of one origin
    pub fn count_records(&self, origin: &str) -> StoreResult<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM records WHERE origin = ?1",
            params![origin],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn parse_timestamp(value: &str) -> StoreResult<DateTime<Utc>> {
    value
        .parse::<DateTime<Utc>>()
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", value, e)))
}

impl CheckpointStore for SqliteStorage {
    fn load(&self, resource_id: &str) -> StoreResult<Option<Checkpoint>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT last_cursor, records_emitted, exhausted, updated_at
             FROM checkpoints WHERE resource_id = ?1",
        )?;

        let row = stmt
            .query_row(params![resource_id], |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .optional()?;

        match row {
            Some((last_cursor, records_emitted, exhausted, updated_at)) => Ok(Some(Checkpoint {
                resource_id: resource_id.to_string(),
                last_cursor: last_cursor.map(|c| Cursor::new(c as u32)),
                records_emitted: records_emitted as u64,
                exhausted,
                updated_at: parse_timestamp(&updated_at)?,
            })),
            None => Ok(None),
        }
    }

    fn save(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO checkpoints (resource_id, last_cursor, records_emitted, exhausted, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(resource_id) DO UPDATE SET
                last_cursor = excluded.last_cursor,
                records_emitted = excluded.records_emitted,
                exhausted = excluded.exhausted,
                updated_at = excluded.updated_at",
            params![
                checkpoint.resource_id,
                checkpoint.last_cursor.map(|c| c.page() as i64),
                checkpoint.records_emitted as i64,
                checkpoint.exhausted,
                checkpoint.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn clear(&self, resource_id: &str) -> StoreResult<()> {
        self.conn().execute(
            "DELETE FROM checkpoints WHERE resource_id = ?1",
            params![resource_id],
        )?;
        Ok(())
    }
}

impl SessionStore for SqliteStorage {
    fn load_session(&self, account: &str) -> StoreResult<Option<StoredSession>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT identity, cookies, created_at, saved_at FROM sessions WHERE account = ?1",
        )?;

        let row = stmt
            .query_row(params![account], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .optional()?;

        match row {
            Some((identity, cookies, created_at, saved_at)) => {
                let cookies: Vec<BrowserCookie> = serde_json::from_str(&cookies)?;
                Ok(Some(StoredSession {
                    account: account.to_string(),
                    identity,
                    cookies,
                    created_at: parse_timestamp(&created_at)?,
                    saved_at: parse_timestamp(&saved_at)?,
                }))
            }
            None => Ok(None),
        }
    }

    fn save_session(&self, session: &StoredSession) -> StoreResult<()> {
        let cookies = serde_json::to_string(&session.cookies)?;
        self.conn().execute(
            "INSERT INTO sessions (account, identity, cookies, created_at, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(account) DO UPDATE SET
                identity = excluded.identity,
                cookies = excluded.cookies,
                created_at = excluded.created_at,
                saved_at = excluded.saved_at",
            params![
                session.account,
                session.identity,
                cookies,
                session.created_at.to_rfc3339(),
                session.saved_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn forget_session(&self, account: &str) -> StoreResult<()> {
        self.conn()
            .execute("DELETE FROM sessions WHERE account = ?1", params![account])?;
        Ok(())
    }
}

impl RecordSink for SqliteStorage {
    fn emit(&self, record: &Record) -> Result<(), SinkError> {
        let fields = serde_json::to_string(&record.fields)?;
        self.conn()
            .execute(
                "INSERT INTO records (origin, cursor, kind, provenance, partial, fields, emitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.origin,
                    record.cursor.page() as i64,
                    record.kind.as_str(),
                    record.provenance,
                    record.partial,
                    fields,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| SinkError::Write(e.to_string()))?;
        Ok(())
    }
}
