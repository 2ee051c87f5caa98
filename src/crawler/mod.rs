//! Crawler module: the crawl engine
//!
//! This module contains the core crawling logic, including:
//! - Adaptive pacing and bounded retries (`rate`)
//! - Authenticated browser sessions (`session`)
//! - Page loading and pagination per target (`navigator`, `site`, `target`)
//! - Rule-driven extraction of records from rendered pages (`rules`, `extractor`)
//! - Overall crawl coordination with checkpoints (`coordinator`)

mod coordinator;
mod extractor;
mod navigator;
mod rate;
mod rules;
mod session;
mod site;
mod target;

pub use coordinator::{run_crawl, Coordinator};
pub use extractor::{ExtractionError, Extractor};
pub use navigator::Navigator;
pub use rate::{RateController, RetryPolicy};
pub use rules::{FieldRule, Normalizer, Query, RuleTable, SectionRule};
pub use session::{Session, SessionManager};
pub use site::{slug_from_href, Pagination, Selectors, SiteMap};
pub use target::{Cursor, PageSnapshot, ResourceKind, Target};
