//! Record sink trait and error types
//!
//! The crawl engine hands every extracted record to a [`RecordSink`]. What the
//! sink does with it (file, database, queue) is outside the engine.

use crate::output::Record;
use thiserror::Error;

/// Errors that can occur while emitting a record
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write record: {0}")]
    Write(String),

    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink is closed")]
    Closed,
}

/// Receiver of extracted records
///
/// The orchestrator retries a failed `emit` a bounded number of times, so a
/// sink should tolerate seeing the same record again (at-least-once).
pub trait RecordSink: Send + Sync {
    fn emit(&self, record: &Record) -> Result<(), SinkError>;

    /// Flushes buffered records; called once at the end of a crawl
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
