//! Storage traits and error types
//!
//! This module defines the trait interfaces for checkpoint and session
//! persistence and their error type.

use crate::storage::{Checkpoint, StoredSession};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable crawl progress, keyed by resource identifier
///
/// Absence of a checkpoint means the resource starts from its first page.
pub trait CheckpointStore: Send + Sync {
    /// Loads the checkpoint of a resource
    ///
    /// # Arguments
    ///
    /// * `resource_id` - Target identifier such as `connections:jane-doe`
    ///
    /// # Returns
    ///
    /// `None` when the resource has never been checkpointed
    fn load(&self, resource_id: &str) -> StoreResult<Option<Checkpoint>>;

    /// Saves (replaces) the checkpoint of `checkpoint.resource_id`
    fn save(&self, checkpoint: &Checkpoint) -> StoreResult<()>;

    /// Removes a checkpoint so the resource is crawled from scratch
    fn clear(&self, resource_id: &str) -> StoreResult<()>;
}

/// Persisted browser cookies for session reuse across runs
pub trait SessionStore: Send + Sync {
    /// Loads the saved session of an account (keyed by login email)
    fn load_session(&self, account: &str) -> StoreResult<Option<StoredSession>>;

    fn save_session(&self, session: &StoredSession) -> StoreResult<()>;

    /// Forgets a saved session, e.g. after it was found invalidated
    fn forget_session(&self, account: &str) -> StoreResult<()>;
}
