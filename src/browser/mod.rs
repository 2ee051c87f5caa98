//! Browser driver abstraction
//!
//! The crawl engine never talks to a browser directly. Everything it needs from
//! a rendered page goes through the [`BrowserDriver`] trait, which has exactly
//! one production implementation ([`ChromiumDriver`], over the Chrome DevTools
//! Protocol) and is faked in tests.
//!
//! A driver is owned by exactly one session; all methods take `&mut self`.

mod chromium;

pub use chromium::ChromiumDriver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a browser driver
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Browser operation timed out: {0}")]
    Timeout(String),

    #[error("Browser protocol error: {0}")]
    Protocol(String),

    #[error("Browser has been closed")]
    Closed,
}

/// A cookie as captured from, and restored into, the browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    /// Expiry as seconds since the epoch; `None` for session cookies
    #[serde(default)]
    pub expires: Option<f64>,
}

/// Minimal set of page interactions the crawl engine relies on
#[async_trait]
pub trait BrowserDriver: Send {
    /// Navigates the page to `url` and waits for the document to load
    async fn goto(&mut self, url: &str) -> Result<(), DriverError>;

    /// Returns the URL the page currently shows, after any redirects
    async fn current_url(&mut self) -> Result<String, DriverError>;

    /// Returns the serialized DOM of the page
    async fn content(&mut self) -> Result<String, DriverError>;

    /// Returns true if at least one element matches `selector`
    async fn exists(&mut self, selector: &str) -> Result<bool, DriverError>;

    /// Returns the number of elements matching `selector`
    async fn count(&mut self, selector: &str) -> Result<usize, DriverError>;

    /// Clicks the first element matching `selector`
    ///
    /// Returns false when nothing matched.
    async fn click(&mut self, selector: &str) -> Result<bool, DriverError>;

    /// Types `text` into the first element matching `selector`
    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), DriverError>;

    /// Scrolls to the bottom of the page to trigger lazy rendering
    async fn scroll_to_bottom(&mut self) -> Result<(), DriverError>;

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, DriverError>;

    async fn set_cookies(&mut self, cookies: &[BrowserCookie]) -> Result<(), DriverError>;

    async fn clear_cookies(&mut self) -> Result<(), DriverError>;

    /// Releases the browser; later calls may fail with [`DriverError::Closed`]
    async fn shutdown(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}
