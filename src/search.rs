use crate::config::SearchConfig;
use crate::{Result, StayWindow};
use tracing::debug;
use url::Url;

/// The `SearchQuery` struct describes one search listing: where, for how many and when.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    base_url: String,
    location: String,
    query: String,
    adults: u32,
    window: StayWindow,
}

impl SearchQuery {
    /// Creates a new `SearchQuery` from the search settings and a resolved stay window.
    ///
    /// # Arguments
    ///
    /// * `config` - The search section of the configuration.
    /// * `window` - The check-in/check-out pair.
    pub fn new(config: &SearchConfig, window: StayWindow) -> Self {
        Self {
            base_url: config.base_url.clone(),
            location: config.location.clone(),
            query: config.query.clone(),
            adults: config.adults,
            window,
        }
    }

    pub fn window(&self) -> StayWindow {
        self.window
    }

    /// Builds the entry URL of the search, e.g.
    /// `https://www.airbnb.cl/s/Santiago-Centro--Santiago--Chile/homes?query=...&adults=2&checkin=...&checkout=...`.
    ///
    /// # Returns
    ///
    /// A `Result` containing the URL, or an error if the base path is not a valid URL.
    pub fn url(&self) -> Result<String> {
        let base = if self.base_url.ends_with('/') {
            self.base_url.clone()
        } else {
            format!("{}/", self.base_url)
        };

        let url = format!(
            "{}{}/homes?query={}&adults={}&checkin={}&checkout={}",
            base,
            urlencoding::encode(&self.location),
            urlencoding::encode(&self.query),
            self.adults,
            self.window.checkin_param(),
            self.window.checkout_param(),
        );

        // Reject malformed bases before a browser ever sees them.
        Url::parse(&url)?;

        debug!("Search URL: {}", url);
        Ok(url)
    }
}
