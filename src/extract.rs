use crate::config::TraversalConfig;
use crate::driver::PageHandle;
use crate::{CrawlerError, ListingId, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, instrument};
use url::Url;

/// Pulls listing identifiers out of a rendered page.
#[async_trait]
pub trait ListingExtractor: Send + Sync {
    /// Selector whose presence means listings have rendered.
    fn selector(&self) -> &str;

    /// Identifiers on `page`, each at most once, in first-seen order.
    async fn extract(&self, page: &dyn PageHandle) -> Result<Vec<ListingId>>;
}

/// Finds the URL of the page after the current one.
#[async_trait]
pub trait NextPageResolver: Send + Sync {
    async fn next_page(&self, page: &dyn PageHandle) -> Result<Option<String>>;
}

/// The `RoomLinkExtractor` matches anchors by selector and takes the identifier
/// from the first capture group of a regex applied to each `href`.
#[derive(Debug, Clone)]
pub struct RoomLinkExtractor {
    selector: String,
    pattern: Regex,
}

impl RoomLinkExtractor {
    /// Creates a new `RoomLinkExtractor`.
    ///
    /// # Arguments
    ///
    /// * `selector` - CSS selector for candidate links, e.g. `a[href*="/rooms/"]`.
    /// * `pattern` - Regex with one capture group, e.g. `/rooms/(\d+)`.
    ///
    /// # Returns
    ///
    /// A `Result` containing the extractor, or an `ExtractionError` if the pattern does not compile.
    pub fn new(selector: impl Into<String>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| CrawlerError::ExtractionError(format!("invalid listing pattern: {e}")))?;
        if pattern.captures_len() < 2 {
            return Err(CrawlerError::ExtractionError(
                "listing pattern needs a capture group".to_string(),
            ));
        }

        Ok(Self {
            selector: selector.into(),
            pattern,
        })
    }

    pub fn from_config(config: &TraversalConfig) -> Result<Self> {
        Self::new(config.listing_selector.clone(), &config.listing_pattern)
    }

    /// Applies the pattern to one link target. Non-matching targets yield `None`.
    pub fn match_href(&self, href: &str) -> Option<ListingId> {
        self.pattern
            .captures(href)
            .and_then(|captures| captures.get(1))
            .and_then(|id| ListingId::new(id.as_str()))
    }
}

#[async_trait]
impl ListingExtractor for RoomLinkExtractor {
    fn selector(&self) -> &str {
        &self.selector
    }

    #[instrument(skip(self, page), fields(url = page.url()))]
    async fn extract(&self, page: &dyn PageHandle) -> Result<Vec<ListingId>> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        for element in page.query(&self.selector).await? {
            let Some(href) = element.attribute("href").await? else {
                continue;
            };
            match self.match_href(&href) {
                Some(id) if seen.insert(id.clone()) => ids.push(id),
                Some(_) => {}
                None => debug!("Discarding non-matching link: {}", href),
            }
        }

        Ok(ids)
    }
}

/// The `PaginationNextLink` follows the first element matching a selector
/// such as `nav[aria-label="..."] a[aria-label="Siguiente"]`.
#[derive(Debug, Clone)]
pub struct PaginationNextLink {
    selector: String,
}

impl PaginationNextLink {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }

    pub fn from_config(config: &TraversalConfig) -> Self {
        Self::new(config.next_selector.clone())
    }
}

#[async_trait]
impl NextPageResolver for PaginationNextLink {
    async fn next_page(&self, page: &dyn PageHandle) -> Result<Option<String>> {
        let Some(control) = page.query(&self.selector).await?.into_iter().next() else {
            return Ok(None);
        };

        let Some(href) = control.attribute("href").await? else {
            // A disabled "next" button renders without a target.
            return Ok(None);
        };

        let next = Url::parse(page.url())?.join(href.trim())?;
        Ok(Some(next.to_string()))
    }
}
