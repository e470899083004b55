use crate::{CrawlerError, Result, StayWindow};
use ::config::{Config, Environment, File};
use chrono::NaiveDate;
use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `LISTING_CRAWLER_ENRICHMENT__BATCH_SIZE=5`.
pub const ENV_PREFIX: &str = "LISTING_CRAWLER";

/// The `CrawlerConfig` struct holds the configuration settings for one crawl run.
/// It covers the search entry point, the browser, traversal timing, enrichment and output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// How the search entry URL is built.
    pub search: SearchConfig,
    /// Which browser driver renders the result pages.
    pub browser: BrowserConfig,
    /// Timing and selectors for the page traversal.
    pub traversal: TraversalConfig,
    /// The enrichment API and its rate control.
    pub enrichment: EnrichmentConfig,
    /// Where the CSV output lands.
    pub output: OutputConfig,
    /// Whether to draw progress bars on the terminal.
    pub show_progress: bool,
}

/// The `SearchConfig` struct describes the search listing the crawl starts from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Base path of the search pages, ending with a slash.
    pub base_url: String,
    /// Location slug appended to the base path.
    pub location: String,
    /// Free-text query sent alongside the slug.
    pub query: String,
    /// Party size.
    pub adults: u32,
    /// Check-in date. Defaults to today.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkin: Option<NaiveDate>,
    /// Check-out date. Defaults to check-in plus `stay_nights`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout: Option<NaiveDate>,
    /// Length of the default stay window.
    pub stay_nights: i64,
}

/// Which rendering engine backs the browser driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserEngine {
    /// Headless Chromium over the DevTools protocol.
    Chromium,
    /// Plain HTTP fetch without JavaScript.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub engine: BrowserEngine,
    /// Explicit browser binary. When unset chromiumoxide looks for one on the system.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,
    pub headless: bool,
    /// Run Chromium with its sandbox enabled.
    pub sandbox: bool,
    pub user_agent: String,
}

/// How traversal decides a page has finished rendering after the element wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleStrategy {
    /// Sleep for the whole settle delay.
    Fixed,
    /// Poll the listing count until it stops changing, bounded by the settle delay.
    StableCount,
}

/// The `TraversalConfig` struct holds the policy values of the page traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    /// Render timeout per page, in milliseconds.
    pub render_timeout_ms: u64,
    /// How long to wait for the first listing link, in milliseconds.
    pub element_wait_ms: u64,
    /// Poll interval for the element wait and stable-count settling, in milliseconds.
    pub poll_interval_ms: u64,
    pub settle: SettleStrategy,
    /// Settling bound, in milliseconds.
    pub settle_delay_ms: u64,
    /// Consecutive identical counts required by `SettleStrategy::StableCount`.
    pub stable_polls: u32,
    /// Render attempts per page. `1` makes the first navigation error fatal.
    pub navigation_attempts: u32,
    /// Backoff before the first retry, doubled for each further retry, in milliseconds.
    pub navigation_backoff_ms: u64,
    /// Stop after this many pages even if a next link exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<usize>,
    /// CSS selector matching listing links.
    pub listing_selector: String,
    /// Regex applied to each link target; the first capture group is the identifier.
    pub listing_pattern: String,
    /// CSS selector matching the "next page" control.
    pub next_selector: String,
}

/// The `EnrichmentConfig` struct holds the settings for the enrichment API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Endpoint queried once per batch.
    pub endpoint: String,
    /// Query parameter repeated once per identifier.
    pub id_param: String,
    /// Identifiers per request. Must be at least 1.
    pub batch_size: usize,
    /// Pause between two requests, in milliseconds.
    pub inter_batch_delay_ms: u64,
    /// Timeout for one request, in milliseconds.
    pub request_timeout_ms: u64,
    /// Declared CSV header. When empty, the first successful batch decides it.
    pub expected_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub file_prefix: String,
    /// Append the process id and start time to the file name so concurrent runs never share a file.
    pub unique_per_run: bool,
}

impl CrawlerConfig {
    /// Loads the configuration from defaults, an optional TOML file and the
    /// environment, in that order.
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to a configuration file.
    ///
    /// # Returns
    ///
    /// A `Result` containing the validated configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.enrichment.batch_size == 0 {
            return Err(invalid("enrichment.batch_size must be at least 1"));
        }
        if self.traversal.navigation_attempts == 0 {
            return Err(invalid("traversal.navigation_attempts must be at least 1"));
        }
        if self.traversal.poll_interval_ms == 0 {
            return Err(invalid("traversal.poll_interval_ms must be at least 1"));
        }
        if self.search.stay_nights < 0 {
            return Err(invalid("search.stay_nights must not be negative"));
        }

        url::Url::parse(&self.enrichment.endpoint)?;

        let pattern = Regex::new(&self.traversal.listing_pattern)
            .map_err(|e| invalid(&format!("traversal.listing_pattern does not compile: {e}")))?;
        if pattern.captures_len() < 2 {
            return Err(invalid(
                "traversal.listing_pattern needs a capture group for the identifier",
            ));
        }

        for (key, selector) in [
            ("traversal.listing_selector", &self.traversal.listing_selector),
            ("traversal.next_selector", &self.traversal.next_selector),
        ] {
            Selector::parse(selector)
                .map_err(|e| invalid(&format!("{key} is not a valid CSS selector: {e}")))?;
        }
        Ok(())
    }
}

fn invalid(message: &str) -> CrawlerError {
    CrawlerError::ConfigError(::config::ConfigError::Message(message.to_string()))
}

impl SearchConfig {
    /// Resolves the configured dates, defaulting to `today` through `today + stay_nights`.
    pub fn stay_window(&self, today: NaiveDate) -> StayWindow {
        let checkin = self.checkin.unwrap_or(today);
        let default = StayWindow::starting(checkin, self.stay_nights);
        StayWindow {
            checkin,
            checkout: self.checkout.unwrap_or(default.checkout),
        }
    }
}

impl TraversalConfig {
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    pub fn element_wait(&self) -> Duration {
        Duration::from_millis(self.element_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Backoff before retry number `retry` (starting at 1).
    pub fn navigation_backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.navigation_backoff_ms.saturating_mul(factor))
    }
}

impl EnrichmentConfig {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl OutputConfig {
    /// The output file for a run started on `date`, e.g. `./listings_2024-01-01.csv`.
    pub fn file_path(&self, date: NaiveDate) -> PathBuf {
        let mut name = format!("{}_{}", self.file_prefix, date.format("%Y-%m-%d"));
        if self.unique_per_run {
            name.push_str(&format!(
                "_{}_{}",
                std::process::id(),
                chrono::Local::now().format("%H%M%S")
            ));
        }
        name.push_str(".csv");
        self.dir.join(name)
    }
}

impl Default for CrawlerConfig {
    /// Provides default values for the `CrawlerConfig` struct.
    ///
    /// # Returns
    ///
    /// A `CrawlerConfig` instance with default settings.
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            browser: BrowserConfig::default(),
            traversal: TraversalConfig::default(),
            enrichment: EnrichmentConfig::default(),
            output: OutputConfig::default(),
            show_progress: true,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://www.airbnb.cl/s/"),
            location: String::from("Santiago-Centro--Santiago--Chile"),
            query: String::from("Santiago Centro, Santiago"),
            adults: 2,
            checkin: None,
            checkout: None,
            stay_nights: crate::DEFAULT_STAY_NIGHTS,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            engine: BrowserEngine::Chromium,
            executable: None,
            headless: true,
            sandbox: false,
            user_agent: String::from(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
            ),
        }
    }
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            render_timeout_ms: crate::DEFAULT_RENDER_TIMEOUT.as_millis() as u64,
            element_wait_ms: crate::DEFAULT_ELEMENT_WAIT.as_millis() as u64,
            poll_interval_ms: 250,
            settle: SettleStrategy::StableCount,
            settle_delay_ms: crate::DEFAULT_SETTLE_DELAY.as_millis() as u64,
            stable_polls: 3,
            navigation_attempts: 1,
            navigation_backoff_ms: 1000,
            max_pages: None,
            listing_selector: String::from(r#"a[href*="/rooms/"]"#),
            listing_pattern: String::from(r"/rooms/(\d+)"),
            next_selector: String::from(
                r#"nav[aria-label="Paginación de los resultados de búsqueda"] a[aria-label="Siguiente"]"#,
            ),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from("http://localhost:3000/scraper"),
            id_param: String::from("idarirbnb"),
            batch_size: crate::DEFAULT_BATCH_SIZE,
            inter_batch_delay_ms: crate::DEFAULT_INTER_BATCH_DELAY.as_millis() as u64,
            request_timeout_ms: crate::DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            expected_fields: Vec::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            file_prefix: String::from("listings"),
            unique_per_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_policy_values() {
        let config = CrawlerConfig::default();

        assert_eq!(config.traversal.render_timeout(), Duration::from_secs(60));
        assert_eq!(config.traversal.element_wait(), Duration::from_secs(15));
        assert_eq!(config.traversal.settle_delay(), Duration::from_secs(5));
        assert_eq!(config.enrichment.inter_batch_delay(), Duration::from_secs(2));
        assert_eq!(config.enrichment.batch_size, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_stay_window_spans_eight_nights() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let window = SearchConfig::default().stay_window(today);

        assert_eq!(window.checkin, today);
        assert_eq!(window.checkout, NaiveDate::from_ymd_opt(2024, 1, 9).unwrap());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let mut config = CrawlerConfig::default();
        config.enrichment.batch_size = 0;

        let result = config.validate();
        assert!(matches!(result, Err(CrawlerError::ConfigError(_))));
    }

    #[test]
    fn test_navigation_backoff_doubles() {
        let config = TraversalConfig {
            navigation_backoff_ms: 100,
            ..TraversalConfig::default()
        };

        assert_eq!(config.navigation_backoff(1), Duration::from_millis(100));
        assert_eq!(config.navigation_backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_output_file_is_keyed_by_date() {
        let output = OutputConfig {
            dir: PathBuf::from("out"),
            ..OutputConfig::default()
        };
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        assert_eq!(output.file_path(date), PathBuf::from("out/listings_2024-01-01.csv"));
    }

    #[test]
    fn test_load_merges_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[enrichment]\nbatch_size = 5\nendpoint = \"http://127.0.0.1:9000/api\"\n\n\
             [traversal]\nsettle = \"fixed\""
        )
        .unwrap();

        let config = CrawlerConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.enrichment.batch_size, 5);
        assert_eq!(config.enrichment.endpoint, "http://127.0.0.1:9000/api");
        assert_eq!(config.enrichment.id_param, "idarirbnb");
        assert_eq!(config.traversal.settle, SettleStrategy::Fixed);
    }

    #[test]
    fn test_environment_overrides_nested_keys() {
        std::env::set_var("LISTING_CRAWLER_ENRICHMENT__INTER_BATCH_DELAY_MS", "750");
        let loaded = CrawlerConfig::load(None);
        std::env::remove_var("LISTING_CRAWLER_ENRICHMENT__INTER_BATCH_DELAY_MS");

        let config = loaded.unwrap();
        assert_eq!(config.enrichment.inter_batch_delay(), Duration::from_millis(750));
        assert_eq!(config.enrichment.batch_size, 1);
    }

    #[test]
    fn test_unique_per_run_file_name_carries_the_process_id() {
        let output = OutputConfig {
            unique_per_run: true,
            ..OutputConfig::default()
        };
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        let path = output.file_path(date);
        let name = path.file_name().unwrap().to_str().unwrap();

        let prefix = format!("listings_2024-01-01_{}_", std::process::id());
        assert!(name.starts_with(&prefix), "{name}");
        assert!(name.ends_with(".csv"));
        // HHMMSS between the pid and the extension.
        assert_eq!(name.len(), prefix.len() + "HHMMSS.csv".len());
    }

    #[test]
    fn test_unparsable_endpoint_is_rejected() {
        let mut config = CrawlerConfig::default();
        config.enrichment.endpoint = "scraper endpoint".to_string();

        assert!(matches!(config.validate(), Err(CrawlerError::InvalidUrl(_))));
    }

    #[test]
    fn test_bad_pattern_and_selectors_are_rejected() {
        let mut config = CrawlerConfig::default();
        config.traversal.listing_pattern = r"/rooms/(\d+".to_string();
        assert!(matches!(config.validate(), Err(CrawlerError::ConfigError(_))));

        let mut config = CrawlerConfig::default();
        config.traversal.listing_pattern = r"/rooms/\d+".to_string();
        assert!(matches!(config.validate(), Err(CrawlerError::ConfigError(_))));

        let mut config = CrawlerConfig::default();
        config.traversal.next_selector = "a[[".to_string();
        assert!(matches!(config.validate(), Err(CrawlerError::ConfigError(_))));
    }
}
