use super::{BrowserCookie, BrowserDriver, DriverError};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{ClearBrowserCookiesParams, CookieParam};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Chrome/Chromium driven over the DevTools Protocol
///
/// Owns the browser process, its single page, and the task that pumps the
/// protocol event stream. Dropping the driver kills the browser.
pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    operation_timeout: Duration,
    closed: bool,
}

impl ChromiumDriver {
    /// Launches a browser and opens a blank page
    ///
    /// # Arguments
    ///
    /// * `headless` - Run without a visible window
    /// * `executable` - Explicit browser binary; auto-detected when `None`
    /// * `operation_timeout` - Upper bound for any single protocol operation
    pub async fn launch(
        headless: bool,
        executable: Option<&str>,
        operation_timeout: Duration,
    ) -> Result<Self, DriverError> {
        let mut builder = BrowserConfig::builder().request_timeout(operation_timeout);
        if !headless {
            builder = builder.with_head();
        }
        if let Some(path) = executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(DriverError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler event error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        debug!(headless, "Browser launched");

        Ok(Self {
            browser,
            page,
            handler,
            operation_timeout,
            closed: false,
        })
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T, DriverError>
    where
        F: Future<Output = Result<T, CdpError>>,
    {
        if self.closed {
            return Err(DriverError::Closed);
        }
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result.map_err(|e| map_cdp_error(what, e)),
            Err(_) => Err(DriverError::Timeout(what.to_string())),
        }
    }

    async fn eval_json(&self, script: &str) -> Result<serde_json::Value, DriverError> {
        let result = self.bounded("evaluate", self.page.evaluate(script)).await?;
        result
            .into_value::<serde_json::Value>()
            .map_err(|e| DriverError::Protocol(e.to_string()))
    }
}

fn map_cdp_error(what: &str, e: CdpError) -> DriverError {
    match e {
        CdpError::Timeout => DriverError::Timeout(what.to_string()),
        other => DriverError::Protocol(format!("{}: {}", what, other)),
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        debug!("goto {}", url);
        self.bounded("goto", async { self.page.goto(url).await.map(|_| ()) })
            .await
    }

    async fn current_url(&mut self) -> Result<String, DriverError> {
        let url = self.bounded("url", self.page.url()).await?;
        Ok(url.unwrap_or_default())
    }

    async fn content(&mut self) -> Result<String, DriverError> {
        self.bounded("content", self.page.content()).await
    }

    async fn exists(&mut self, selector: &str) -> Result<bool, DriverError> {
        Ok(self.count(selector).await? > 0)
    }

    async fn count(&mut self, selector: &str) -> Result<usize, DriverError> {
        let script = format!(
            "document.querySelectorAll({}).length",
            serde_json::Value::String(selector.to_string())
        );
        let value = self.eval_json(&script).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn click(&mut self, selector: &str) -> Result<bool, DriverError> {
        let elements = self
            .bounded("find_elements", self.page.find_elements(selector))
            .await?;
        match elements.first() {
            Some(element) => {
                self.bounded("click", async { element.click().await.map(|_| ()) })
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), DriverError> {
        let element = self
            .bounded("find_element", self.page.find_element(selector))
            .await?;
        self.bounded("focus", async { element.click().await.map(|_| ()) })
            .await?;
        self.bounded("type", async { element.type_str(text).await.map(|_| ()) })
            .await
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), DriverError> {
        self.eval_json("window.scrollTo(0, document.body.scrollHeight); true")
            .await
            .map(|_| ())
    }

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, DriverError> {
        let cookies = self.bounded("get_cookies", self.page.get_cookies()).await?;
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
                expires: if c.session { None } else { Some(c.expires) },
            })
            .collect())
    }

    async fn set_cookies(&mut self, cookies: &[BrowserCookie]) -> Result<(), DriverError> {
        let params = cookies
            .iter()
            .map(|c| {
                CookieParam::builder()
                    .name(c.name.clone())
                    .value(c.value.clone())
                    .domain(c.domain.clone())
                    .path(c.path.clone())
                    .secure(c.secure)
                    .http_only(c.http_only)
                    .build()
                    .map_err(DriverError::Protocol)
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.bounded("set_cookies", async {
            self.page.set_cookies(params).await.map(|_| ())
        })
        .await
    }

    async fn clear_cookies(&mut self) -> Result<(), DriverError> {
        self.bounded("clear_cookies", async {
            self.page
                .execute(ClearBrowserCookiesParams::default())
                .await
                .map(|_| ())
        })
        .await
    }

    async fn shutdown(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.browser.close().await;
        self.handler.abort();
        if let Err(e) = result {
            warn!("Failed to close browser cleanly: {}", e);
            return Err(DriverError::Protocol(e.to_string()));
        }
        debug!("Browser closed");
        Ok(())
    }
}
