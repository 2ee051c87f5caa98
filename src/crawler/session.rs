//! Session manager: authenticated browser sessions
//!
//! A [`Session`] owns its browser driver exclusively. The [`SessionManager`]
//! creates sessions by logging in (or by reusing saved cookies), checks that a
//! session is still usable, re-authenticates invalidated sessions and tears
//! them down.
//!
//! Login outcome is decided by polling the landing page:
//! - the feed means success
//! - a checkpoint URL or challenge form means a verification challenge
//! - a visible form error means the credentials were rejected

use crate::browser::{BrowserCookie, BrowserDriver};
use crate::config::{ChallengeMode, Config, Credentials, RateConfig, TimeoutConfig};
use crate::crawler::navigator::navigation_error;
use crate::crawler::rate::{RateController, RetryPolicy};
use crate::crawler::site::SiteMap;
use crate::state::Liveness;
use crate::storage::{SessionStore, StoredSession};
use crate::CrawlError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const UNATTENDED_HINT: &str =
    "re-run with a visible browser (--headed or HEADLESS=0) and complete the verification manually";

/// An authenticated browser session
pub struct Session<D> {
    pub(crate) driver: D,
    pub(crate) cookies: Vec<BrowserCookie>,
    pub(crate) identity: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_used: DateTime<Utc>,
    pub(crate) liveness: Liveness,
    pub(crate) rate: RateController,
    closed: bool,
}

impl<D: BrowserDriver> Session<D> {
    fn new(driver: D, rate: RateController) -> Self {
        let now = Utc::now();
        Self {
            driver,
            cookies: Vec::new(),
            identity: None,
            created_at: now,
            last_used: now,
            liveness: Liveness::Expired,
            rate,
            closed: false,
        }
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    /// Slug of the logged-in member, when it could be discovered
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn cookies(&self) -> &[BrowserCookie] {
        &self.cookies
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        self.last_used
    }

    pub fn rate(&self) -> &RateController {
        &self.rate
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Records a successful interaction
    pub(crate) fn touch(&mut self) {
        self.last_used = Utc::now();
        if self.liveness == Liveness::Fresh {
            self.liveness = Liveness::Active;
        }
    }

    /// Gives the driver back, e.g. to shut the browser down
    pub fn into_driver(self) -> D {
        self.driver
    }
}

/// Creates, checks, re-authenticates and closes sessions
pub struct SessionManager {
    site: SiteMap,
    credentials: Credentials,
    challenge_mode: ChallengeMode,
    timeouts: TimeoutConfig,
    retry: RetryPolicy,
    rate: RateConfig,
    shared_rate: Option<RateController>,
    logout_on_close: bool,
    store: Option<Arc<dyn SessionStore>>,
}

impl SessionManager {
    /// Creates a manager from configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Crawler configuration (timeouts, retries, pacing)
    /// * `site` - URLs and selectors of the target site
    /// * `credentials` - Login account
    /// * `challenge_mode` - What to do when the site asks for verification
    pub fn new(
        config: &Config,
        site: SiteMap,
        credentials: Credentials,
        challenge_mode: ChallengeMode,
    ) -> Self {
        Self {
            site,
            credentials,
            challenge_mode,
            timeouts: config.timeouts.clone(),
            retry: RetryPolicy::login(&config.retry),
            rate: config.rate.clone(),
            shared_rate: None,
            logout_on_close: config.crawl.logout_on_close,
            store: None,
        }
    }

    /// Persists cookies in `store` and tries them before the login form
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Makes every session opened by this manager share one backoff state
    pub fn with_shared_rate(mut self, rate: RateController) -> Self {
        self.shared_rate = Some(rate);
        self
    }

    pub fn site(&self) -> &SiteMap {
        &self.site
    }

    pub fn challenge_mode(&self) -> ChallengeMode {
        self.challenge_mode
    }

    /// Authenticates a new session on `driver`
    ///
    /// # Returns
    ///
    /// * `Ok(Session)` - A fresh, logged-in session
    /// * `Err(CrawlError::Auth)` - The credentials were rejected
    /// * `Err(CrawlError::ChallengeRequired)` - Verification could not be completed
    /// * `Err(CrawlError::NavigationTimeout)` - No login outcome within the retry budget
    pub async fn open<D: BrowserDriver>(&self, driver: D) -> Result<Session<D>, CrawlError> {
        let rate = self
            .shared_rate
            .clone()
            .unwrap_or_else(|| RateController::new(&self.rate));
        let mut session = Session::new(driver, rate);
        self.authenticate(&mut session).await?;
        Ok(session)
    }

    /// Closes `session` and logs in again on the same browser
    pub async fn reopen<D: BrowserDriver>(&self, session: &mut Session<D>) -> Result<(), CrawlError> {
        info!("Re-authenticating session");
        self.close(session).await;
        session.closed = false;
        self.authenticate(session).await
    }

    /// Checks, without navigating, that `session` can still be used
    ///
    /// Driver errors count as not live.
    pub async fn verify_live<D: BrowserDriver>(&self, session: &mut Session<D>) -> bool {
        if session.closed || !session.liveness.is_usable() {
            return false;
        }

        match session.driver.current_url().await {
            Ok(url) if self.site.is_login_wall(&url) => {
                debug!("Session shows a login wall at {}", url);
                session.liveness = Liveness::Expired;
                false
            }
            Ok(url) if self.site.is_challenge(&url) => {
                debug!("Session shows a challenge at {}", url);
                session.liveness = Liveness::Challenged;
                false
            }
            Ok(_) => true,
            Err(e) => {
                debug!("Liveness probe failed: {}", e);
                false
            }
        }
    }

    /// Tears `session` down; never fails and may be called repeatedly
    pub async fn close<D: BrowserDriver>(&self, session: &mut Session<D>) {
        if session.closed {
            return;
        }

        if !session.liveness.is_usable() {
            self.forget_stored();
        } else if self.logout_on_close {
            let logout = self.site.logout_url();
            if let Err(e) = session.driver.goto(logout.as_str()).await {
                warn!("Logout navigation failed: {}", e);
            }
            if let Err(e) = session.driver.clear_cookies().await {
                warn!("Failed to clear browser cookies: {}", e);
            }
            session.cookies.clear();
            self.forget_stored();
        } else {
            match session.driver.cookies().await {
                Ok(cookies) => {
                    session.cookies = cookies;
                    self.persist(session);
                }
                Err(e) => warn!("Could not capture cookies on close: {}", e),
            }
        }

        session.liveness = Liveness::Expired;
        session.closed = true;
        debug!("Session closed");
    }

    async fn authenticate<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
    ) -> Result<(), CrawlError> {
        if self.restore(session).await {
            return Ok(());
        }

        let mut attempt = 1;
        loop {
            match self.submit_credentials(session).await {
                Ok(()) => break,
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    session.rate.record_outcome(false);
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(
                        "Login attempt {}/{} failed: {}; retrying in {}ms",
                        attempt,
                        self.retry.max_attempts,
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("Login failed: {}", e);
                    return Err(e);
                }
            }
        }

        self.establish(session).await;
        Ok(())
    }

    /// Tries the cookies saved by an earlier run
    async fn restore<D: BrowserDriver>(&self, session: &mut Session<D>) -> bool {
        let Some(store) = &self.store else {
            return false;
        };

        let stored = match store.load_session(&self.credentials.email) {
            Ok(Some(stored)) if !stored.cookies.is_empty() => stored,
            Ok(_) => return false,
            Err(e) => {
                warn!("Could not load saved session: {}", e);
                return false;
            }
        };

        session.rate.throttle().await;
        if let Err(e) = session.driver.set_cookies(&stored.cookies).await {
            warn!("Could not restore saved cookies: {}", e);
            return false;
        }

        let feed = self.site.feed_url();
        let landed = match session.driver.goto(feed.as_str()).await {
            Ok(()) => session.driver.current_url().await.unwrap_or_default(),
            Err(e) => {
                debug!("Feed check with saved cookies failed: {}", e);
                String::new()
            }
        };

        if self.site.is_feed(&landed) {
            info!("Reusing saved session from {}", stored.saved_at);
            let now = Utc::now();
            session.cookies = stored.cookies;
            session.identity = stored.identity;
            session.created_at = stored.created_at;
            session.last_used = now;
            session.liveness = Liveness::Fresh;
            return true;
        }

        info!("Saved session is no longer accepted; logging in");
        self.forget_stored();
        if let Err(e) = session.driver.clear_cookies().await {
            debug!("Failed to clear stale cookies: {}", e);
        }
        false
    }

    async fn submit_credentials<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
    ) -> Result<(), CrawlError> {
        let login = self.site.login_url();
        let selectors = &self.site.selectors;

        session.rate.throttle().await;
        let started = Instant::now();
        session
            .driver
            .goto(login.as_str())
            .await
            .map_err(|e| navigation_error(login.as_str(), e, started.elapsed()))?;

        // Cookies still in the browser may already be valid
        let landed = session.driver.current_url().await?;
        if self.site.is_feed(&landed) {
            return Ok(());
        }

        let deadline = Instant::now() + self.timeouts.login();
        while !session.driver.exists(&selectors.login_email).await? {
            if Instant::now() >= deadline {
                return Err(CrawlError::NavigationTimeout {
                    url: login.to_string(),
                    waited: self.timeouts.login(),
                });
            }
            sleep(self.timeouts.poll()).await;
        }

        debug!("Submitting login form");
        session
            .driver
            .fill(&selectors.login_email, &self.credentials.email)
            .await?;
        session
            .driver
            .fill(&selectors.login_password, &self.credentials.password)
            .await?;

        session.rate.throttle().await;
        if !session.driver.click(&selectors.login_submit).await? {
            return Err(CrawlError::Navigation {
                url: login.to_string(),
                message: "login form has no submit button".to_string(),
            });
        }

        self.await_login_outcome(session).await
    }

    async fn await_login_outcome<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
    ) -> Result<(), CrawlError> {
        let selectors = &self.site.selectors;
        let deadline = Instant::now() + self.timeouts.login();

        loop {
            let url = session.driver.current_url().await?;
            if self.site.is_feed(&url) {
                return Ok(());
            }
            if self.site.is_challenge(&url) || session.driver.exists(&selectors.challenge).await? {
                return self.handle_challenge(session).await;
            }
            if session.driver.exists(&selectors.login_error).await? {
                return Err(CrawlError::Auth {
                    reason: "the site rejected the email or password".to_string(),
                });
            }
            if Instant::now() >= deadline {
                return Err(CrawlError::NavigationTimeout {
                    url: self.site.login_url().to_string(),
                    waited: self.timeouts.login(),
                });
            }
            sleep(self.timeouts.poll()).await;
        }
    }

    async fn handle_challenge<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
    ) -> Result<(), CrawlError> {
        session.liveness = Liveness::Challenged;
        session.rate.record_outcome(false);

        match self.challenge_mode {
            ChallengeMode::Unattended => {
                warn!("Verification challenge met in unattended mode");
                Err(CrawlError::ChallengeRequired {
                    mode: self.challenge_mode,
                    hint: UNATTENDED_HINT.to_string(),
                })
            }
            ChallengeMode::Interactive => {
                let waited = self.timeouts.challenge();
                warn!(
                    "Verification challenge: complete it in the browser window (waiting up to {}s)",
                    waited.as_secs()
                );
                let deadline = Instant::now() + waited;
                loop {
                    let url = session.driver.current_url().await?;
                    if self.site.is_feed(&url) {
                        info!("Verification completed");
                        return Ok(());
                    }
                    if Instant::now() >= deadline {
                        return Err(CrawlError::ChallengeRequired {
                            mode: self.challenge_mode,
                            hint: format!(
                                "verification was not completed within {}s",
                                waited.as_secs()
                            ),
                        });
                    }
                    sleep(self.timeouts.poll()).await;
                }
            }
        }
    }

    /// Captures identity and cookies of a freshly logged-in session
    async fn establish<D: BrowserDriver>(&self, session: &mut Session<D>) {
        let now = Utc::now();
        session.created_at = now;
        session.last_used = now;
        session.liveness = Liveness::Fresh;

        session.identity = match session.driver.content().await {
            Ok(html) => self.site.identity_from_html(&html),
            Err(e) => {
                debug!("Could not read landing page: {}", e);
                None
            }
        };

        match session.driver.cookies().await {
            Ok(cookies) => session.cookies = cookies,
            Err(e) => warn!("Could not capture session cookies: {}", e),
        }

        info!(
            "Authenticated as {}",
            session.identity.as_deref().unwrap_or("an unknown member")
        );
        self.persist(session);
    }

    fn persist<D>(&self, session: &Session<D>) {
        let Some(store) = &self.store else {
            return;
        };
        if session.cookies.is_empty() {
            return;
        }
        let stored = StoredSession {
            account: self.credentials.email.clone(),
            identity: session.identity.clone(),
            cookies: session.cookies.clone(),
            created_at: session.created_at,
            saved_at: Utc::now(),
        };
        if let Err(e) = store.save_session(&stored) {
            warn!("Could not save session cookies: {}", e);
        }
    }

    fn forget_stored(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.forget_session(&self.credentials.email) {
                warn!("Could not forget saved session: {}", e);
            }
        }
    }
}
