use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Main configuration structure for the crawler
///
/// Every section is optional in the TOML file; missing keys fall back to the
/// defaults below, which are tuned for a single unattended profile crawl.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub site: SiteConfig,
    pub browser: BrowserConfig,
    pub crawl: CrawlConfig,
    pub rate: RateConfig,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
    pub output: OutputConfig,
}

/// Target site location
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SiteConfig {
    /// Origin every site path is resolved against
    pub base_url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.linkedin.com".to_string(),
        }
    }
}

/// How a verification challenge met during login is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengeMode {
    /// A human resolves the challenge in the visible browser window
    Interactive,
    /// Fail immediately; nobody is watching
    Unattended,
}

impl fmt::Display for ChallengeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interactive => f.write_str("interactive"),
            Self::Unattended => f.write_str("unattended"),
        }
    }
}

/// Browser presentation
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BrowserConfig {
    /// Run without a visible window
    pub headless: bool,

    /// Challenge handling; derived from `headless` when unset
    pub challenge_mode: Option<ChallengeMode>,

    /// Explicit path to the Chrome/Chromium binary
    pub chrome_executable: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            challenge_mode: None,
            chrome_executable: None,
        }
    }
}

impl BrowserConfig {
    /// Effective challenge mode: interactive only makes sense with a window
    pub fn effective_challenge_mode(&self) -> ChallengeMode {
        self.challenge_mode.unwrap_or(if self.headless {
            ChallengeMode::Unattended
        } else {
            ChallengeMode::Interactive
        })
    }
}

/// What to crawl for each profile and how persistently
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlConfig {
    /// Extract the profile page itself
    pub profile: bool,

    /// Walk the profile's connection list
    pub connections: bool,

    /// Maximum re-authentications after a session is invalidated mid-crawl
    pub max_reauth: u32,

    /// Log out when the session is closed instead of keeping cookies for reuse
    pub logout_on_close: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            profile: true,
            connections: true,
            max_reauth: 3,
            logout_on_close: false,
        }
    }
}

/// Adaptive pacing between browser interactions
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RateConfig {
    /// Lowest base delay, also the starting point (milliseconds)
    pub floor_ms: u64,

    /// Highest base delay after repeated friction (milliseconds)
    pub ceiling_ms: u64,

    /// Factor applied to the base delay on friction, and removed on decay
    pub multiplier: f64,

    /// Upper bound of the random delay added on top of the base (milliseconds)
    pub jitter_ms: u64,

    /// Consecutive clean interactions before the base delay decays one step
    pub decay_after: u32,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            floor_ms: 2_000,
            ceiling_ms: 60_000,
            multiplier: 2.0,
            jitter_ms: 1_500,
            decay_after: 5,
        }
    }
}

/// Bounded retry budgets
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetryConfig {
    pub navigation_attempts: u32,
    pub login_attempts: u32,
    pub sink_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            navigation_attempts: 3,
            login_attempts: 3,
            sink_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
        }
    }
}

/// Bounds on every blocking wait
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TimeoutConfig {
    /// Wait for a page's content-ready signal
    pub content_ready_ms: u64,

    /// Wait for the login outcome after submitting credentials
    pub login_ms: u64,

    /// Wait for a human to resolve a challenge in interactive mode
    pub challenge_ms: u64,

    /// Interval between readiness probes
    pub poll_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            content_ready_ms: 15_000,
            login_ms: 30_000,
            challenge_ms: 300_000,
            poll_ms: 250,
        }
    }
}

impl TimeoutConfig {
    pub fn content_ready(&self) -> Duration {
        Duration::from_millis(self.content_ready_ms)
    }

    pub fn login(&self) -> Duration {
        Duration::from_millis(self.login_ms)
    }

    pub fn challenge(&self) -> Duration {
        Duration::from_millis(self.challenge_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database holding checkpoints and sessions
    pub database_path: String,

    /// JSON-lines file for records ("-" for stdout); records go to the
    /// database when unset
    pub records_path: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: "./crawl.db".to_string(),
            records_path: None,
        }
    }
}

/// Login credentials
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The crawl input handed over by the command line layer
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    /// Profile slugs (the `/in/<slug>/` URL suffix), crawled in order
    pub profile_slugs: Vec<String>,
    pub credentials: Credentials,
    pub headless: bool,
}
