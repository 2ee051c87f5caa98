//! linkedin-crawl: an authenticated profile and connection-graph crawler
//!
//! This crate drives a browser session against a professional networking site,
//! walks a target profile and its paginated connection list, and turns the
//! rendered pages into structured records for a downstream sink. Progress is
//! checkpointed per page so interrupted crawls resume instead of repeating.

pub mod browser;
pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Main error type for crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication failed: {reason}")]
    Auth { reason: String },

    #[error("Verification challenge required ({mode}): {hint}")]
    ChallengeRequired {
        mode: config::ChallengeMode,
        hint: String,
    },

    #[error("Session is no longer valid: {reason}")]
    SessionInvalid { reason: String },

    #[error("Timed out after {}ms waiting for {url}", .waited.as_millis())]
    NavigationTimeout { url: String, waited: Duration },

    #[error("Navigation error at {url}: {message}")]
    Navigation { url: String, message: String },

    #[error("Resource not found: {resource}")]
    ResourceNotFound { resource: String },

    #[error("Extraction schema error: {0}")]
    ExtractionSchema(#[from] crawler::ExtractionError),

    #[error("Sink error: {0}")]
    Sink(#[from] output::SinkError),

    #[error("Store error: {0}")]
    Store(#[from] storage::StoreError),

    #[error("Browser error: {0}")]
    Driver(#[from] browser::DriverError),

    #[error("Invalid navigator transition: {from} -> {to}")]
    InvalidTransition {
        from: state::NavState,
        to: state::NavState,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrawlError {
    /// Returns true for failures that are worth retrying locally with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NavigationTimeout { .. }
                | Self::Navigation { .. }
                | Self::Sink(_)
                | Self::Store(_)
                | Self::Driver(_)
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Stage of the crawl pipeline, used to report where a fatal error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Opening storage, sinks or the browser
    Startup,
    Authenticate,
    Resume,
    Load,
    Extract,
    Emit,
    Advance,
    Checkpoint,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Startup => "startup",
            Self::Authenticate => "authenticate",
            Self::Resume => "resume",
            Self::Load => "load",
            Self::Extract => "extract",
            Self::Emit => "emit",
            Self::Advance => "advance",
            Self::Checkpoint => "checkpoint",
        };
        f.write_str(name)
    }
}

/// A fatal crawl failure, carrying enough context for a re-run to resume
#[derive(Debug, Error)]
#[error(
    "crawl failed at stage '{stage}' for {resource} (last committed cursor: {}): {source}",
    cursor_label(.last_cursor)
)]
pub struct CrawlFailure {
    pub stage: Stage,
    pub resource: String,
    pub last_cursor: Option<crawler::Cursor>,
    #[source]
    pub source: CrawlError,
}

fn cursor_label(cursor: &Option<crawler::Cursor>) -> String {
    cursor
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{Config, CrawlRequest, Credentials};
pub use crawler::{Coordinator, Cursor, ResourceKind};
pub use output::{CrawlReport, Record, RecordKind, RecordSink};
pub use state::{Liveness, NavState};
pub use storage::{Checkpoint, CheckpointStore};
