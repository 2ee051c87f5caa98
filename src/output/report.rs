//! End-of-crawl summary

use tracing::info;

/// Counters collected over one crawl run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Pages whose records were emitted and checkpointed
    pub pages: u64,

    /// Records emitted to the sink
    pub records: u64,

    /// Targets skipped as not found or restricted
    pub skipped: Vec<String>,

    /// Targets already exhausted by an earlier run
    pub already_done: Vec<String>,

    /// Sessions re-opened after invalidation
    pub reauthentications: u32,

    /// The run stopped early on request, after a clean checkpoint
    pub cancelled: bool,
}

impl CrawlReport {
    /// Logs the report
    pub fn log(&self) {
        info!(
            pages = self.pages,
            records = self.records,
            reauthentications = self.reauthentications,
            cancelled = self.cancelled,
            "Crawl finished"
        );
        for target in &self.skipped {
            info!("  skipped: {}", target);
        }
        for target in &self.already_done {
            info!("  already complete: {}", target);
        }
    }
}
