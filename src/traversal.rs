use crate::config::{SettleStrategy, TraversalConfig};
use crate::driver::{BrowserDriver, PageHandle};
use crate::extract::{ListingExtractor, NextPageResolver};
use crate::{CrawlerError, ListingSet, PageRef, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

/// The `Traverser` walks a paginated search listing through a browser driver,
/// following the "next" control until there is none, and collects every listing
/// identifier it sees exactly once.
pub struct Traverser<'a> {
    /// The driver that renders pages. Owned exclusively for the whole walk.
    driver: &'a mut dyn BrowserDriver,
    /// Timing and retry policy.
    config: TraversalConfig,
    /// Spinner showing the page currently processed.
    progress: ProgressBar,
    /// Successful renders so far.
    pages_rendered: usize,
}

impl<'a> Traverser<'a> {
    /// Creates a new `Traverser`.
    ///
    /// # Arguments
    ///
    /// * `driver` - The browser driver used to render each page.
    /// * `config` - The traversal policy values.
    /// * `show_progress` - Whether to draw a spinner on the terminal.
    pub fn new(
        driver: &'a mut dyn BrowserDriver,
        config: TraversalConfig,
        show_progress: bool,
    ) -> Self {
        let progress = if show_progress {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
                spinner.set_style(style);
            }
            spinner
        } else {
            ProgressBar::hidden()
        };

        Self {
            driver,
            config,
            progress,
            pages_rendered: 0,
        }
    }

    pub fn pages_rendered(&self) -> usize {
        self.pages_rendered
    }

    /// Walks the listing starting at `start_url`.
    ///
    /// # Arguments
    ///
    /// * `start_url` - The first search result page.
    /// * `extractor` - Pulls identifiers out of each rendered page.
    /// * `resolver` - Finds the next page, if any.
    ///
    /// # Returns
    ///
    /// A `Result` containing every identifier reachable through the "next" chain.
    /// Any render or navigation error that survives the retry policy aborts the
    /// walk, and no partial set is returned.
    #[instrument(skip(self, extractor, resolver))]
    pub async fn traverse(
        &mut self,
        start_url: &str,
        extractor: &dyn ListingExtractor,
        resolver: &dyn NextPageResolver,
    ) -> Result<ListingSet> {
        let mut listings = ListingSet::new();
        let mut visited = HashSet::new();
        let mut current = PageRef::Url(start_url.to_string());

        while let PageRef::Url(url) = current {
            if let Some(max_pages) = self.config.max_pages {
                if self.pages_rendered >= max_pages {
                    warn!("Stopping after {} pages (max_pages), next was {}", max_pages, url);
                    break;
                }
            }

            info!("Processing page {}: {}", self.pages_rendered + 1, url);
            self.progress.set_message(format!(
                "Page {} ({} listings so far)",
                self.pages_rendered + 1,
                listings.len()
            ));
            visited.insert(url.clone());

            let page = self.render(&url).await?;

            if !self.wait_for_listings(page.as_ref(), extractor.selector()).await? {
                warn!(
                    "No listings appeared on {} within {:?}, extracting anyway",
                    url,
                    self.config.element_wait()
                );
            }
            self.settle(page.as_ref(), extractor.selector()).await?;

            let ids = extractor.extract(page.as_ref()).await?;
            let found = ids.len();
            let added = listings.extend_counting(ids);
            info!(found, new = added, total = listings.len(), "Listings found on page");

            current = match resolver.next_page(page.as_ref()).await? {
                Some(next) if visited.contains(&next) => {
                    warn!("Next link points back to visited page {}, stopping", next);
                    PageRef::End
                }
                next => PageRef::from_option(next),
            };
        }

        self.progress.finish_with_message(format!(
            "Traversal finished: {} pages, {} unique listings",
            self.pages_rendered,
            listings.len()
        ));
        info!(
            pages = self.pages_rendered,
            listings = listings.len(),
            "Finished walking the search pages"
        );

        Ok(listings)
    }

    /// Renders `url`, applying the render timeout and the navigation retry policy.
    async fn render(&mut self, url: &str) -> Result<Box<dyn PageHandle>> {
        let attempts = self.config.navigation_attempts.max(1);
        let render_timeout = self.config.render_timeout();
        let mut attempt = 1;

        loop {
            let result = match timeout(render_timeout, self.driver.render(url)).await {
                Ok(result) => result,
                Err(_) => Err(CrawlerError::RenderTimeout {
                    url: url.to_string(),
                    timeout: render_timeout,
                }),
            };

            match result {
                Ok(page) => {
                    self.pages_rendered += 1;
                    return Ok(page);
                }
                Err(e) if attempt < attempts => {
                    let backoff = self.config.navigation_backoff(attempt);
                    warn!(
                        "Render attempt {}/{} for {} failed: {}, retrying in {:?}",
                        attempt, attempts, url, e, backoff
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("Giving up on {} after {} attempt(s): {}", url, attempt, e);
                    return Err(e);
                }
            }
        }
    }

    /// Polls until at least one element matches `selector`.
    /// Returns `false` when the element wait elapses first.
    async fn wait_for_listings(&self, page: &dyn PageHandle, selector: &str) -> Result<bool> {
        let deadline = Instant::now() + self.config.element_wait();

        loop {
            if !page.query(selector).await?.is_empty() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            sleep(self.config.poll_interval().min(deadline - now)).await;
        }
    }

    /// Waits for client-side rendering to calm down before extraction.
    async fn settle(&self, page: &dyn PageHandle, selector: &str) -> Result<()> {
        let bound = self.config.settle_delay();

        match self.config.settle {
            SettleStrategy::Fixed => sleep(bound).await,
            SettleStrategy::StableCount => {
                let deadline = Instant::now() + bound;
                let mut last = page.query(selector).await?.len();
                let mut stable = 0;

                while stable < self.config.stable_polls {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!("Listing count still changing at the settle bound ({})", last);
                        break;
                    }
                    sleep(self.config.poll_interval().min(deadline - now)).await;

                    let count = page.query(selector).await?.len();
                    if count == last {
                        stable += 1;
                    } else {
                        stable = 0;
                        last = count;
                    }
                }
            }
        }

        Ok(())
    }
}
