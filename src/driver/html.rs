use super::{BrowserDriver, ElementHandle, PageHandle};
use crate::config::BrowserConfig;
use crate::{CrawlerError, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument};

/// A page backed by a fixed HTML document.
///
/// The markup is kept as text and parsed per query; `scraper::Html` is not
/// `Send` and must not live across an await point.
#[derive(Debug, Clone)]
pub struct HtmlPage {
    url: String,
    html: String,
}

impl HtmlPage {
    /// Creates a new `HtmlPage` for `html` as served from `url`.
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }

    /// Runs `selector` against the document and snapshots the matching elements.
    ///
    /// # Arguments
    ///
    /// * `selector` - A CSS selector.
    ///
    /// # Returns
    ///
    /// A `Result` containing the matches in document order, or an error if the selector does not parse.
    pub fn select(&self, selector: &str) -> Result<Vec<HtmlElement>> {
        let selector = Selector::parse(selector).map_err(|e| {
            CrawlerError::ExtractionError(format!("invalid selector {selector:?}: {e}"))
        })?;

        let document = Html::parse_document(&self.html);
        let elements = document
            .select(&selector)
            .map(|element| HtmlElement {
                attributes: element
                    .value()
                    .attrs()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect(),
            })
            .collect();

        Ok(elements)
    }
}

#[async_trait]
impl PageHandle for HtmlPage {
    fn url(&self) -> &str {
        &self.url
    }

    async fn query(&self, selector: &str) -> Result<Vec<Box<dyn ElementHandle>>> {
        Ok(self
            .select(selector)?
            .into_iter()
            .map(|element| Box::new(element) as Box<dyn ElementHandle>)
            .collect())
    }
}

/// Attributes of one element, copied out of the parsed document.
#[derive(Debug, Clone, Default)]
pub struct HtmlElement {
    attributes: Vec<(String, String)>,
}

impl HtmlElement {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[async_trait]
impl ElementHandle for HtmlElement {
    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.get(name).map(str::to_string))
    }
}

/// Fetches pages over plain HTTP. No JavaScript runs, so client-rendered
/// listings come back empty.
pub struct HttpDriver {
    client: Client,
}

impl HttpDriver {
    /// Creates a new `HttpDriver` sending the configured user agent.
    pub fn new(config: &BrowserConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl BrowserDriver for HttpDriver {
    #[instrument(skip(self))]
    async fn render(&mut self, url: &str) -> Result<Box<dyn PageHandle>> {
        let response = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "es-CL,es;q=0.9,en;q=0.5")
            .send()
            .await
            .map_err(|e| CrawlerError::NavigationError {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        debug!("Response status: {}", status);
        if !status.is_success() {
            return Err(CrawlerError::NavigationError {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let final_url = response.url().to_string();
        let html = response.text().await?;

        Ok(Box::new(HtmlPage::new(final_url, html)))
    }
}
