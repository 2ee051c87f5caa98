//! Navigator: moves a session through the pages of one target
//!
//! The navigator loads the page at a target's cursor, waits until its content
//! is rendered and hands back a [`PageSnapshot`]. It then decides whether more
//! pages exist and moves the cursor forward. Each target carries a small state
//! machine ([`NavState`]) that rejects out-of-order calls.

use crate::browser::{BrowserDriver, DriverError};
use crate::config::Config;
use crate::crawler::rate::RetryPolicy;
use crate::crawler::session::{Session, SessionManager};
use crate::crawler::site::{Pagination, SiteMap};
use crate::crawler::target::{Cursor, PageSnapshot, ResourceKind, Target};
use crate::state::{Liveness, NavState};
use crate::CrawlError;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

/// Upper bound on "see more" expansion passes over one profile
const MAX_EXPAND_ROUNDS: usize = 20;

/// Maps a driver failure during navigation to a crawl error
pub(crate) fn navigation_error(url: &str, error: DriverError, waited: Duration) -> CrawlError {
    match error {
        DriverError::Timeout(_) => CrawlError::NavigationTimeout {
            url: url.to_string(),
            waited,
        },
        other => CrawlError::Navigation {
            url: url.to_string(),
            message: other.to_string(),
        },
    }
}

fn is_retryable(error: &CrawlError) -> bool {
    matches!(
        error,
        CrawlError::NavigationTimeout { .. } | CrawlError::Navigation { .. } | CrawlError::Driver(_)
    )
}

/// Loads and paginates targets over a session
pub struct Navigator {
    site: SiteMap,
    retry: RetryPolicy,
    content_ready: Duration,
    poll: Duration,
}

impl Navigator {
    pub fn new(config: &Config, site: SiteMap) -> Self {
        Self {
            site,
            retry: RetryPolicy::navigation(&config.retry),
            content_ready: config.timeouts.content_ready(),
            poll: config.timeouts.poll(),
        }
    }

    /// Loads the page at the target's cursor
    ///
    /// Timeouts and other transient navigation failures are retried with
    /// exponential backoff; each one is reported to the session's rate
    /// controller.
    ///
    /// # Returns
    ///
    /// * `Ok(PageSnapshot)` - The rendered page, ready for extraction
    /// * `Err(CrawlError::SessionInvalid)` - The session must be re-authenticated
    /// * `Err(CrawlError::ResourceNotFound)` - The target does not exist or is not visible
    /// * `Err(CrawlError::NavigationTimeout)` - Content never became ready
    pub async fn load<D: BrowserDriver>(
        &self,
        sessions: &SessionManager,
        session: &mut Session<D>,
        target: &mut Target,
    ) -> Result<PageSnapshot, CrawlError> {
        let mut attempt = 1;
        loop {
            target.transition(NavState::Loading)?;
            debug!(resource = %target.id(), cursor = %target.cursor(), attempt, "Loading page");

            match self.load_once(sessions, session, target).await {
                Ok(page) => {
                    target.transition(NavState::Loaded)?;
                    session.rate.record_outcome(true);
                    session.touch();
                    return Ok(page);
                }
                Err(e) => {
                    target.transition(NavState::Error)?;
                    if !is_retryable(&e) {
                        return Err(e);
                    }
                    session.rate.record_outcome(false);
                    if !self.retry.should_retry(attempt) {
                        warn!(
                            "Giving up on {} at {} after {} attempts: {}",
                            target.id(),
                            target.cursor(),
                            attempt,
                            e
                        );
                        return Err(e);
                    }
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(
                        "Load of {} at {} failed (attempt {}/{}): {}; retrying in {}ms",
                        target.id(),
                        target.cursor(),
                        attempt,
                        self.retry.max_attempts,
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Moves the target past `page`
    ///
    /// # Returns
    ///
    /// * `Ok((cursor, has_more))` - The new cursor; with `has_more == false` the
    ///   target is exhausted and further calls fail
    pub async fn advance<D: BrowserDriver>(
        &self,
        sessions: &SessionManager,
        session: &mut Session<D>,
        target: &mut Target,
        page: &PageSnapshot,
    ) -> Result<(Cursor, bool), CrawlError> {
        if !target.state().can_transition_to(NavState::Paginating) {
            return Err(CrawlError::InvalidTransition {
                from: target.state(),
                to: NavState::Paginating,
            });
        }
        if page.resource_id != target.id() || page.cursor != target.cursor() {
            return Err(CrawlError::Navigation {
                url: page.url.clone(),
                message: format!(
                    "snapshot {}@{} does not belong to {}@{}",
                    page.resource_id,
                    page.cursor,
                    target.id(),
                    target.cursor()
                ),
            });
        }

        target.transition(NavState::Paginating)?;

        let has_more = match self.probe_more(sessions, session, target).await {
            Ok(has_more) => has_more,
            Err(e) => {
                target.transition(NavState::Error)?;
                return Err(e);
            }
        };

        let cursor = target.advance_cursor();
        if has_more {
            target.transition(NavState::Loaded)?;
        } else {
            target.transition(NavState::Exhausted)?;
            info!("{} exhausted after {}", target.id(), page.cursor);
        }
        Ok((cursor, has_more))
    }

    /// Tells whether pages remain after the loaded one
    ///
    /// Reads only the pagination controls on screen; unlike
    /// [`advance`](Self::advance), nothing grows or navigates.
    pub async fn has_more_pages<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
        target: &Target,
    ) -> Result<bool, CrawlError> {
        let control = match pagination_of(target) {
            Pagination::Single => return Ok(false),
            Pagination::QueryParam => &self.site.selectors.next_button,
            Pagination::LoadMore => &self.site.selectors.load_more,
        };
        Ok(session.driver.exists(control).await?)
    }

    async fn load_once<D: BrowserDriver>(
        &self,
        sessions: &SessionManager,
        session: &mut Session<D>,
        target: &mut Target,
    ) -> Result<PageSnapshot, CrawlError> {
        if !sessions.verify_live(session).await {
            return Err(CrawlError::SessionInvalid {
                reason: format!("session is {}", session.liveness),
            });
        }

        match target.kind() {
            ResourceKind::Profile => self.load_profile(session, target).await,
            ResourceKind::ConnectionList => self.load_connections(session, target).await,
        }
    }

    async fn load_profile<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
        target: &Target,
    ) -> Result<PageSnapshot, CrawlError> {
        let url = self.site.profile_url(target.slug());
        self.open_page(session, &url).await?;
        self.wait_ready(session, &self.site.selectors.profile_ready, &url)
            .await?;
        self.reveal(session).await?;

        let html = session.driver.content().await?;
        Ok(snapshot(target, &url, html, 0))
    }

    async fn load_connections<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
        target: &mut Target,
    ) -> Result<PageSnapshot, CrawlError> {
        let (list, pagination) = match target.list.clone() {
            Some(list) => list,
            None => {
                let list = self.resolve_list(session, target).await?;
                debug!("{} lists connections at {}", target.id(), list.0);
                target.list = Some(list.clone());
                list
            }
        };

        match pagination {
            Pagination::Single | Pagination::QueryParam => {
                let url = self.site.page_url(&list, target.cursor().page());
                self.open_page(session, &url).await?;
                self.wait_ready(session, &self.site.selectors.search_item, &url)
                    .await?;
                let html = session.driver.content().await?;
                Ok(snapshot(target, &url, html, 0))
            }
            Pagination::LoadMore => {
                let items = &self.site.selectors.own_connection_item;
                let in_place = std::mem::take(&mut target.in_place);

                if !in_place {
                    self.open_page(session, &list).await?;
                    self.wait_ready(session, items, &list).await?;

                    // Replay the growth steps that earlier pages consumed
                    target.seen_items = 0;
                    for _ in 0..target.cursor().page() {
                        let before = session.driver.count(items).await?;
                        if !self.grow(session, before).await? {
                            return Err(CrawlError::NavigationTimeout {
                                url: list.to_string(),
                                waited: self.content_ready,
                            });
                        }
                        target.seen_items = before;
                    }
                } else {
                    self.wait_ready(session, items, &list).await?;
                }

                let html = session.driver.content().await?;
                Ok(snapshot(target, &list, html, target.seen_items))
            }
        }
    }

    /// Finds where the target's connection list lives
    async fn resolve_list<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
        target: &Target,
    ) -> Result<(Url, Pagination), CrawlError> {
        if session.identity.as_deref() == Some(target.slug()) {
            return Ok((self.site.own_connections_url(), Pagination::LoadMore));
        }

        let profile = self.site.profile_url(target.slug());
        self.open_page(session, &profile).await?;
        self.wait_ready(session, &self.site.selectors.profile_ready, &profile)
            .await?;
        let html = session.driver.content().await?;

        match self.site.connections_link_from_html(&html) {
            Some(link) => Ok((link, Pagination::QueryParam)),
            None => Err(CrawlError::ResourceNotFound {
                resource: format!("connection list of {}", target.slug()),
            }),
        }
    }

    /// Throttles, navigates and classifies where the site sent us
    async fn open_page<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
        url: &Url,
    ) -> Result<(), CrawlError> {
        session.rate.throttle().await;
        let started = Instant::now();
        session
            .driver
            .goto(url.as_str())
            .await
            .map_err(|e| navigation_error(url.as_str(), e, started.elapsed()))?;

        let landed = session.driver.current_url().await?;
        if self.site.is_login_wall(&landed) {
            session.liveness = Liveness::Expired;
            return Err(CrawlError::SessionInvalid {
                reason: format!("redirected to a login wall at {}", landed),
            });
        }
        if self.site.is_challenge(&landed) {
            session.liveness = Liveness::Challenged;
            session.rate.record_outcome(false);
            return Err(CrawlError::SessionInvalid {
                reason: format!("verification interstitial at {}", landed),
            });
        }
        if self.site.is_not_found(&landed)
            || session.driver.exists(&self.site.selectors.not_found).await?
        {
            return Err(CrawlError::ResourceNotFound {
                resource: url.to_string(),
            });
        }
        Ok(())
    }

    /// Polls until `selector` matches, bounded by the content-ready timeout
    async fn wait_ready<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
        selector: &str,
        url: &Url,
    ) -> Result<(), CrawlError> {
        let deadline = Instant::now() + self.content_ready;
        loop {
            if session.driver.exists(selector).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CrawlError::NavigationTimeout {
                    url: url.to_string(),
                    waited: self.content_ready,
                });
            }
            sleep(self.poll).await;
        }
    }

    /// Scrolls a profile and expands its collapsed sections
    async fn reveal<D: BrowserDriver>(&self, session: &mut Session<D>) -> Result<(), CrawlError> {
        session.rate.throttle().await;
        session.driver.scroll_to_bottom().await?;

        for _ in 0..MAX_EXPAND_ROUNDS {
            let mut expanded = false;
            for selector in &self.site.selectors.expanders {
                if session.driver.exists(selector).await? {
                    session.rate.throttle().await;
                    expanded |= session.driver.click(selector).await?;
                }
            }
            if !expanded {
                break;
            }
        }
        Ok(())
    }

    /// Triggers one in-place growth step and waits for new items
    ///
    /// Returns false when no new items appeared before the timeout.
    async fn grow<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
        before: usize,
    ) -> Result<bool, CrawlError> {
        let selectors = &self.site.selectors;
        session.rate.throttle().await;
        if !session.driver.click(&selectors.load_more).await? {
            session.driver.scroll_to_bottom().await?;
        }

        let deadline = Instant::now() + self.content_ready;
        loop {
            if session.driver.count(&selectors.own_connection_item).await? > before {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(self.poll).await;
        }
    }

    async fn probe_more<D: BrowserDriver>(
        &self,
        sessions: &SessionManager,
        session: &mut Session<D>,
        target: &mut Target,
    ) -> Result<bool, CrawlError> {
        match pagination_of(target) {
            Pagination::Single => Ok(false),
            Pagination::QueryParam => Ok(session
                .driver
                .exists(&self.site.selectors.next_button)
                .await?),
            Pagination::LoadMore => {
                if !sessions.verify_live(session).await {
                    return Err(CrawlError::SessionInvalid {
                        reason: format!("session is {}", session.liveness),
                    });
                }
                let before = session
                    .driver
                    .count(&self.site.selectors.own_connection_item)
                    .await?;
                if self.grow(session, before).await? {
                    target.seen_items = before;
                    target.in_place = true;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

fn pagination_of(target: &Target) -> Pagination {
    match (target.kind(), &target.list) {
        (ResourceKind::Profile, _) | (_, None) => Pagination::Single,
        (_, Some((_, pagination))) => *pagination,
    }
}

fn snapshot(target: &Target, url: &Url, html: String, item_offset: usize) -> PageSnapshot {
    PageSnapshot {
        resource_id: target.id(),
        kind: target.kind(),
        slug: target.slug().to_string(),
        cursor: target.cursor(),
        url: url.to_string(),
        html,
        item_offset,
    }
}
