//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the crawl loop that ties everything together:
//! - Authenticating one session for the whole run
//! - Building the worklist of targets from the requested profile slugs
//! - Resuming each target from its checkpoint
//! - Driving load, extract, emit, advance and checkpoint for every page
//! - Re-authenticating invalidated sessions and skipping missing targets
//! - Stopping cleanly between pages when cancelled

use crate::browser::{BrowserDriver, ChromiumDriver};
use crate::config::{Config, CrawlRequest};
use crate::crawler::extractor::Extractor;
use crate::crawler::navigator::Navigator;
use crate::crawler::rate::{RateController, RetryPolicy};
use crate::crawler::rules::RuleTable;
use crate::crawler::session::{Session, SessionManager};
use crate::crawler::site::SiteMap;
use crate::crawler::target::Target;
use crate::output::{CrawlReport, JsonLinesSink, Record, RecordSink};
use crate::storage::{Checkpoint, CheckpointStore, SessionStore, SqliteStorage};
use crate::{CrawlError, CrawlFailure, Stage};
use chrono::Utc;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How one target ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetOutcome {
    Done,
    Skipped,
    AlreadyDone,
    Cancelled,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Config,
    request: CrawlRequest,
    sink: Arc<dyn RecordSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    sessions: SessionManager,
    navigator: Navigator,
    extractor: Extractor,
    sink_retry: RetryPolicy,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `request` - Profiles to crawl and the account to crawl them with
    /// * `sink` - Where extracted records go
    /// * `checkpoints` - Durable per-target progress
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(CrawlError)` - The site URL or the rule table is invalid
    pub fn new(
        config: Config,
        request: CrawlRequest,
        sink: Arc<dyn RecordSink>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self, CrawlError> {
        let site = SiteMap::new(&config.site.base_url)?;

        let mut browser = config.browser.clone();
        browser.headless = request.headless;
        let challenge_mode = browser.effective_challenge_mode();

        let sessions = SessionManager::new(
            &config,
            site.clone(),
            request.credentials.clone(),
            challenge_mode,
        );
        let navigator = Navigator::new(&config, site);
        let extractor = Extractor::linkedin()?;
        let sink_retry = RetryPolicy::sink(&config.retry);

        Ok(Self {
            config,
            request,
            sink,
            checkpoints,
            sessions,
            navigator,
            extractor,
            sink_retry,
            cancel: CancellationToken::new(),
        })
    }

    /// Saves and reuses login cookies through `store`
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = self.sessions.with_store(store);
        self
    }

    /// Shares `rate` with every session of this crawl
    ///
    /// Crawls behind the same egress address pass clones of one controller so
    /// friction seen by one backs off the others.
    pub fn with_shared_rate(mut self, rate: RateController) -> Self {
        self.sessions = self.sessions.with_shared_rate(rate);
        self
    }

    /// Replaces the built-in extraction rules
    pub fn with_rule_table(mut self, table: RuleTable) -> Result<Self, CrawlError> {
        self.extractor = Extractor::new(table)?;
        Ok(self)
    }

    /// Stops the crawl at the next page boundary once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Targets of this run, in crawl order
    pub fn worklist(&self) -> Vec<Target> {
        let mut targets = Vec::new();
        for slug in &self.request.profile_slugs {
            if self.config.crawl.profile {
                targets.push(Target::profile(slug.as_str()));
            }
            if self.config.crawl.connections {
                targets.push(Target::connections(slug.as_str()));
            }
        }
        targets
    }

    /// Drops the checkpoints of every target in the worklist
    pub fn clear_checkpoints(&self) -> Result<(), CrawlError> {
        for target in self.worklist() {
            self.checkpoints.clear(&target.id())?;
        }
        Ok(())
    }

    /// Runs the crawl on `driver`
    ///
    /// The session is always closed and the driver shut down before this
    /// returns, whatever the outcome.
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlReport)` - Every target finished, was skipped, or the run was cancelled
    /// * `Err(CrawlFailure)` - A fatal error; checkpoints hold the last committed page
    pub async fn run<D: BrowserDriver>(&self, driver: D) -> Result<CrawlReport, CrawlFailure> {
        let worklist = self.worklist();
        info!(
            "Starting crawl of {} profile(s), {} target(s)",
            self.request.profile_slugs.len(),
            worklist.len()
        );

        let mut session = match self.sessions.open(driver).await {
            Ok(session) => session,
            Err(e) => {
                error!("Could not authenticate: {}", e);
                return Err(CrawlFailure {
                    stage: Stage::Authenticate,
                    resource: self.request.credentials.email.clone(),
                    last_cursor: None,
                    source: e,
                });
            }
        };

        let mut report = CrawlReport::default();
        let result = self.crawl_worklist(&mut session, worklist, &mut report).await;

        self.sessions.close(&mut session).await;
        let mut driver = session.into_driver();
        if let Err(e) = driver.shutdown().await {
            warn!("Browser shutdown failed: {}", e);
        }

        match result {
            Ok(()) => {
                report.log();
                Ok(report)
            }
            Err(failure) => {
                error!("{}", failure);
                Err(failure)
            }
        }
    }

    async fn crawl_worklist<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
        worklist: Vec<Target>,
        report: &mut CrawlReport,
    ) -> Result<(), CrawlFailure> {
        for target in worklist {
            if self.cancel.is_cancelled() {
                info!("Stop requested; not starting {}", target.id());
                report.cancelled = true;
                return Ok(());
            }

            let id = target.id();
            match self.crawl_target(session, target, report).await? {
                TargetOutcome::Done => info!("Finished {}", id),
                TargetOutcome::Skipped => report.skipped.push(id),
                TargetOutcome::AlreadyDone => report.already_done.push(id),
                TargetOutcome::Cancelled => {
                    report.cancelled = true;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn crawl_target<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
        target: Target,
        report: &mut CrawlReport,
    ) -> Result<TargetOutcome, CrawlFailure> {
        let id = target.id();

        let stored = match retry(&self.sink_retry, "checkpoint load", || {
            self.checkpoints.load(&id)
        })
        .await
        {
            Ok(stored) => stored,
            Err(e) => {
                return Err(CrawlFailure {
                    stage: Stage::Resume,
                    resource: id,
                    last_cursor: None,
                    source: e.into(),
                })
            }
        };

        let mut checkpoint = match stored {
            Some(checkpoint) if checkpoint.exhausted => {
                info!("{} already complete; skipping", id);
                return Ok(TargetOutcome::AlreadyDone);
            }
            Some(checkpoint) => {
                info!(
                    "Resuming {} at {} ({} records already emitted)",
                    id,
                    checkpoint.resume_cursor(),
                    checkpoint.records_emitted
                );
                checkpoint
            }
            None => Checkpoint::empty(id.as_str()),
        };

        let mut target = Target::new(target.kind(), target.slug(), checkpoint.resume_cursor());

        loop {
            let page = match self
                .navigator
                .load(&self.sessions, session, &mut target)
                .await
            {
                Ok(page) => page,
                Err(CrawlError::SessionInvalid { reason }) => {
                    self.recover(Stage::Load, session, &mut target, &checkpoint, reason, report)
                        .await?;
                    continue;
                }
                Err(CrawlError::ResourceNotFound { resource }) => {
                    warn!("Skipping {}: {} not found", id, resource);
                    return Ok(TargetOutcome::Skipped);
                }
                Err(e) => return Err(self.fail(Stage::Load, &checkpoint, e).await),
            };

            let records = match self.extractor.extract(&page) {
                Ok(records) => records,
                Err(e) => return Err(self.fail(Stage::Extract, &checkpoint, e.into()).await),
            };
            if records.is_empty() {
                session.rate.record_outcome(false);
            }

            if let Err(e) = self.emit_page(&records).await {
                return Err(self.fail(Stage::Emit, &checkpoint, e).await);
            }

            checkpoint.last_cursor = Some(page.cursor);
            checkpoint.records_emitted += records.len() as u64;
            report.pages += 1;
            report.records += records.len() as u64;

            if self.cancel.is_cancelled() {
                let has_more = match self.navigator.has_more_pages(session, &target).await {
                    Ok(has_more) => has_more,
                    Err(e) => {
                        warn!("Could not tell whether {} has more pages: {}", id, e);
                        true
                    }
                };
                self.commit(&mut checkpoint, !has_more).await?;
                info!(
                    "Stop requested; {} checkpointed at {}{}",
                    id,
                    page.cursor,
                    if has_more { "" } else { ", complete" }
                );
                return Ok(TargetOutcome::Cancelled);
            }

            match self
                .navigator
                .advance(&self.sessions, session, &mut target, &page)
                .await
            {
                Ok((next, has_more)) => {
                    self.commit(&mut checkpoint, !has_more).await?;
                    info!(
                        "{} page {}: {} record(s){}",
                        id,
                        page.cursor,
                        records.len(),
                        if has_more { "" } else { ", last page" }
                    );
                    if !has_more {
                        return Ok(TargetOutcome::Done);
                    }
                    debug!("{} advancing to {}", id, next);
                }
                Err(e) => {
                    self.commit(&mut checkpoint, false).await?;
                    match e {
                        CrawlError::SessionInvalid { reason } => {
                            self.recover(
                                Stage::Advance,
                                session,
                                &mut target,
                                &checkpoint,
                                reason,
                                report,
                            )
                            .await?;
                        }
                        other => return Err(self.fail(Stage::Advance, &checkpoint, other).await),
                    }
                }
            }
        }
    }

    /// Re-authenticates and rewinds `target` to the last committed page
    ///
    /// `stage` is the step whose session was found invalid; it names the
    /// failure once the re-authentication budget is spent.
    async fn recover<D: BrowserDriver>(
        &self,
        stage: Stage,
        session: &mut Session<D>,
        target: &mut Target,
        checkpoint: &Checkpoint,
        reason: String,
        report: &mut CrawlReport,
    ) -> Result<(), CrawlFailure> {
        let invalid = CrawlError::SessionInvalid { reason };
        if report.reauthentications >= self.config.crawl.max_reauth {
            error!(
                "Session invalidated again after {} re-authentication(s)",
                report.reauthentications
            );
            return Err(self.fail(stage, checkpoint, invalid).await);
        }

        report.reauthentications += 1;
        warn!(
            "{}; re-authenticating ({}/{})",
            invalid, report.reauthentications, self.config.crawl.max_reauth
        );

        if let Err(e) = self.sessions.reopen(session).await {
            return Err(self.fail(Stage::Authenticate, checkpoint, e).await);
        }

        target.reset_to(checkpoint.resume_cursor());
        info!("Resuming {} at {}", target.id(), target.cursor());
        Ok(())
    }

    /// Emits every record of one page, then flushes the sink
    async fn emit_page(&self, records: &[Record]) -> Result<(), CrawlError> {
        for record in records {
            retry(&self.sink_retry, "record emit", || self.sink.emit(record)).await?;
        }
        retry(&self.sink_retry, "sink flush", || self.sink.flush()).await?;
        Ok(())
    }

    /// Saves the in-memory checkpoint after a page was emitted
    async fn commit(&self, checkpoint: &mut Checkpoint, exhausted: bool) -> Result<(), CrawlFailure> {
        checkpoint.exhausted = exhausted;
        checkpoint.updated_at = Utc::now();
        if let Err(e) = retry(&self.sink_retry, "checkpoint save", || {
            self.checkpoints.save(checkpoint)
        })
        .await
        {
            return Err(CrawlFailure {
                stage: Stage::Checkpoint,
                resource: checkpoint.resource_id.clone(),
                last_cursor: checkpoint.last_cursor,
                source: e.into(),
            });
        }
        Ok(())
    }

    /// Re-saves the last committed checkpoint and wraps a fatal error
    async fn fail(&self, stage: Stage, checkpoint: &Checkpoint, source: CrawlError) -> CrawlFailure {
        if checkpoint.last_cursor.is_some() {
            let result = retry(&self.sink_retry, "checkpoint save", || {
                self.checkpoints.save(checkpoint)
            })
            .await;
            if let Err(e) = result {
                error!("Could not re-save checkpoint of {}: {}", checkpoint.resource_id, e);
            }
        }

        CrawlFailure {
            stage,
            resource: checkpoint.resource_id.clone(),
            last_cursor: checkpoint.last_cursor,
            source,
        }
    }
}

/// Runs a synchronous store or sink operation with bounded retries
async fn retry<T, E, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(attempt) => {
                let delay = policy.backoff_delay(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {}ms",
                    what,
                    attempt,
                    policy.max_attempts,
                    e,
                    delay.as_millis()
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Runs a complete crawl with the bundled backends
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the SQLite database for checkpoints and saved sessions
/// 2. Pick the record sink (JSON lines when configured, the database otherwise)
/// 3. Launch Chromium, headless or windowed as requested
/// 4. Authenticate and crawl every requested profile
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `request` - Profiles and credentials
/// * `fresh` - Forget existing checkpoints of the requested targets first
/// * `cancel` - Cancelled to stop after the current page
///
/// # Example
///
/// ```no_run
/// use linkedin_crawl::config::{Config, CrawlRequest, Credentials};
/// use linkedin_crawl::crawler::run_crawl;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let request = CrawlRequest {
///     profile_slugs: vec!["jane-doe".to_string()],
///     credentials: Credentials::new("me@example.com", "secret"),
///     headless: true,
/// };
/// let report = run_crawl(Config::default(), request, false, CancellationToken::new()).await?;
/// println!("{} records", report.records);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(
    config: Config,
    request: CrawlRequest,
    fresh: bool,
    cancel: CancellationToken,
) -> Result<CrawlReport, CrawlFailure> {
    let startup = |source: CrawlError| CrawlFailure {
        stage: Stage::Startup,
        resource: "startup".to_string(),
        last_cursor: None,
        source,
    };

    let storage = Arc::new(
        SqliteStorage::new(Path::new(&config.output.database_path))
            .map_err(|e| startup(e.into()))?,
    );
    let sink: Arc<dyn RecordSink> = match &config.output.records_path {
        Some(path) => Arc::new(JsonLinesSink::open(path).map_err(|e| startup(e.into()))?),
        None => storage.clone(),
    };

    let coordinator = Coordinator::new(config.clone(), request.clone(), sink, storage.clone())
        .map_err(startup)?
        .with_session_store(storage)
        .with_cancellation(cancel);

    if fresh {
        info!("Starting fresh: clearing checkpoints of the requested targets");
        coordinator.clear_checkpoints().map_err(startup)?;
    }

    let driver = ChromiumDriver::launch(
        request.headless,
        config.browser.chrome_executable.as_deref(),
        config.timeouts.content_ready(),
    )
    .await
    .map_err(|e| startup(e.into()))?;

    coordinator.run(driver).await
}
