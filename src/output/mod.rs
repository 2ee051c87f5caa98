//! Output module for extracted records
//!
//! This module handles:
//! - The record model (`Record`, `RecordKind`, `FieldValue`, `PartialDate`)
//! - The `RecordSink` interface the crawl engine emits to
//! - A JSON-lines sink for files and stdout
//! - The end-of-crawl report

mod jsonl;
mod record;
mod report;
mod traits;

pub use jsonl::JsonLinesSink;
pub use record::{FieldValue, PartialDate, Record, RecordKind};
pub use report::CrawlReport;
pub use traits::{RecordSink, SinkError};
