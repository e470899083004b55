use std::time::Duration;
use thiserror::Error;

pub mod config;
pub mod driver;
pub mod enrich;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod search;
pub mod traversal;
pub mod types;

// Re-export commonly used types
pub use config::CrawlerConfig;
pub use types::{EnrichedRecord, ListingId, ListingSet, PageRef, StayWindow};

/// The `CrawlerError` enum represents the errors that can occur while crawling and enriching listings.
#[derive(Error, Debug)]
pub enum CrawlerError {
    /// Represents an error that occurs during an HTTP request.
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// The browser failed to navigate to a page.
    #[error("Navigation to {url} failed: {reason}")]
    NavigationError { url: String, reason: String },
    /// A page did not finish rendering within the render timeout.
    #[error("Rendering {url} timed out after {timeout:?}")]
    RenderTimeout { url: String, timeout: Duration },
    /// The browser process itself misbehaved (launch, CDP, element lookup).
    #[error("Browser error: {0}")]
    BrowserError(String),
    /// Represents an error that occurs during identifier extraction.
    #[error("Extraction failed: {0}")]
    ExtractionError(String),
    /// The enrichment source answered with something unusable.
    #[error("Enrichment failed: {0}")]
    EnrichmentError(String),
    #[error("CSV encoding failed: {0}")]
    CsvError(#[from] csv::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] ::config::ConfigError),
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Whether an error should end the run or only the unit of work that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Aborts the whole run.
    Fatal,
    /// Logged and skipped; the run continues with the next batch.
    Recoverable,
}

impl CrawlerError {
    /// Classifies the error for the caller's abort-or-continue decision.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrawlerError::RequestError(_) | CrawlerError::EnrichmentError(_) => {
                ErrorKind::Recoverable
            }
            CrawlerError::NavigationError { .. }
            | CrawlerError::ExtractionError(_)
            | CrawlerError::RenderTimeout { .. }
            | CrawlerError::BrowserError(_)
            | CrawlerError::CsvError(_)
            | CrawlerError::IoError(_)
            | CrawlerError::ConfigError(_)
            | CrawlerError::InvalidUrl(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

/// A type alias for `Result` with the `CrawlerError` error type.
pub type Result<T> = std::result::Result<T, CrawlerError>;

// Constants

/// How long a single page render may take before the run is aborted.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(60);
/// How long to wait for the first listing link to appear on a page.
pub const DEFAULT_ELEMENT_WAIT: Duration = Duration::from_secs(15);
/// Upper bound on the settling phase after the element wait.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);
/// Pause between two enrichment requests.
pub const DEFAULT_INTER_BATCH_DELAY: Duration = Duration::from_secs(2);
/// Timeout for a single enrichment request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Number of identifiers per enrichment request.
pub const DEFAULT_BATCH_SIZE: usize = 1;
/// Length of the default stay window, in nights.
pub const DEFAULT_STAY_NIGHTS: i64 = 8;
