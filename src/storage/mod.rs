//! Storage module for persisting crawl progress
//!
//! This module handles all durable state of the crawler:
//! - Per-resource checkpoints, so an interrupted crawl resumes instead of repeating
//! - Saved browser cookies, so later runs can skip the login form
//! - Optionally, the emitted records themselves
//!
//! The crawl engine only sees the `CheckpointStore` and `SessionStore` traits;
//! `SqliteStorage` is the bundled backend.

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{CheckpointStore, SessionStore, StoreError, StoreResult};

use crate::browser::BrowserCookie;
use crate::crawler::Cursor;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_storage(path: &Path) -> StoreResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Durable progress of one target resource
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub resource_id: String,

    /// Last page whose records were all emitted; `None` before the first page
    pub last_cursor: Option<Cursor>,

    /// Records emitted for this resource across all runs
    pub records_emitted: u64,

    /// No pages remain after `last_cursor`
    pub exhausted: bool,

    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// A checkpoint for a resource nothing has been emitted for yet
    pub fn empty(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            last_cursor: None,
            records_emitted: 0,
            exhausted: false,
            updated_at: Utc::now(),
        }
    }

    /// Cursor the next run should start from
    pub fn resume_cursor(&self) -> Cursor {
        self.last_cursor
            .map(|cursor| cursor.next())
            .unwrap_or_else(Cursor::first)
    }
}

/// Saved cookies of an authenticated session
#[derive(Debug, Clone)]
pub struct StoredSession {
    /// Login account (email) the cookies belong to
    pub account: String,

    /// Slug of the logged-in member, when known
    pub identity: Option<String>,

    pub cookies: Vec<BrowserCookie>,
    pub created_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
}
