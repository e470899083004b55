//! Browser driver abstraction.
//!
//! Traversal only needs three capabilities from a browser: render a URL,
//! query the rendered page with a CSS selector, and read element attributes.
//! `chromium` drives a real headless browser, `html` serves static markup.

pub mod chromium;
pub mod html;

use crate::config::{BrowserConfig, BrowserEngine};
use crate::Result;
use async_trait::async_trait;

pub use chromium::ChromiumDriver;
pub use html::{HtmlElement, HtmlPage, HttpDriver};

/// Renders pages. One driver is owned exclusively by one traversal.
#[async_trait]
pub trait BrowserDriver: Send {
    /// Navigate to `url` and return a handle on the rendered page.
    /// Timeouts are applied by the caller.
    async fn render(&mut self, url: &str) -> Result<Box<dyn PageHandle>>;

    /// Release the browser. The driver must not be used afterwards.
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A rendered page.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// The URL the page was rendered from, after redirects.
    fn url(&self) -> &str;

    /// All elements currently matching `selector`, in document order.
    async fn query(&self, selector: &str) -> Result<Vec<Box<dyn ElementHandle>>>;
}

/// One element of a rendered page.
#[async_trait]
pub trait ElementHandle: Send + Sync {
    async fn attribute(&self, name: &str) -> Result<Option<String>>;
}

/// Builds the driver selected by `config.engine`.
pub async fn connect(config: &BrowserConfig) -> Result<Box<dyn BrowserDriver>> {
    match config.engine {
        BrowserEngine::Chromium => Ok(Box::new(ChromiumDriver::launch(config).await?)),
        BrowserEngine::Http => Ok(Box::new(HttpDriver::new(config)?)),
    }
}
