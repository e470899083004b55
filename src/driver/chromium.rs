//! Headless Chromium driver using chromiumoxide.

use super::{BrowserDriver, ElementHandle, PageHandle};
use crate::config::BrowserConfig;
use crate::{CrawlerError, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as LaunchConfig};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// A single Chromium tab, reused for every page of the traversal.
pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromiumDriver {
    /// Launches Chromium and opens the tab the traversal will drive.
    ///
    /// # Arguments
    ///
    /// * `config` - The browser section of the configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the driver, or a `BrowserError` if Chromium cannot be started.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let mut builder = LaunchConfig::builder()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-setuid-sandbox");

        if let Some(path) = &config.executable {
            builder = builder.chrome_executable(path);
        }
        if !config.sandbox {
            builder = builder.no_sandbox();
        }
        if !config.headless {
            builder = builder.with_head();
        }

        let launch = builder
            .build()
            .map_err(|e| {
                CrawlerError::BrowserError(format!("failed to build browser config: {e}"))
            })?;

        let (browser, mut handler) = Browser::launch(launch)
            .await
            .map_err(|e| CrawlerError::BrowserError(format!("failed to launch Chromium: {e}")))?;

        // The CDP event loop must be polled for the browser to make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler event error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| CrawlerError::BrowserError(format!("failed to open tab: {e}")))?;
        if let Err(e) = page.set_user_agent(config.user_agent.as_str()).await {
            return Err(CrawlerError::BrowserError(format!(
                "failed to set user agent: {e}"
            )));
        }

        info!("Chromium launched");

        Ok(Self {
            browser,
            page,
            handler,
        })
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    #[instrument(skip(self))]
    async fn render(&mut self, url: &str) -> Result<Box<dyn PageHandle>> {
        let navigation_error = |e: chromiumoxide::error::CdpError| CrawlerError::NavigationError {
            url: url.to_string(),
            reason: e.to_string(),
        };

        self.page.goto(url).await.map_err(navigation_error)?;
        if let Err(e) = self.page.wait_for_navigation().await {
            debug!("wait_for_navigation after goto failed: {}", e);
        }

        let final_url = self
            .page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        Ok(Box::new(ChromiumPage {
            page: self.page.clone(),
            url: final_url,
        }))
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close Chromium cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Failed to reap Chromium process: {}", e);
        }
        self.handler.abort();
        Ok(())
    }
}

/// The tab's state right after a render.
pub struct ChromiumPage {
    page: Page,
    url: String,
}

#[async_trait]
impl PageHandle for ChromiumPage {
    fn url(&self) -> &str {
        &self.url
    }

    async fn query(&self, selector: &str) -> Result<Vec<Box<dyn ElementHandle>>> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| CrawlerError::BrowserError(format!("query {selector:?} failed: {e}")))?;

        Ok(elements
            .into_iter()
            .map(|element| Box::new(ChromiumElement { element }) as Box<dyn ElementHandle>)
            .collect())
    }
}

pub struct ChromiumElement {
    element: Element,
}

#[async_trait]
impl ElementHandle for ChromiumElement {
    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        self.element
            .attribute(name)
            .await
            .map_err(|e| {
                CrawlerError::BrowserError(format!("failed to read attribute {name}: {e}"))
            })
    }
}
