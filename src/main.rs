use anyhow::Context;
use listing_crawler::{
    config::CrawlerConfig,
    driver,
    enrich::EnrichmentClient,
    extract::{PaginationNextLink, RoomLinkExtractor},
    output::CsvStream,
    pipeline::EnrichmentPipeline,
    search::SearchQuery,
    traversal::Traverser,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

/// The main entry point of the application.
///
/// This function initializes logging, loads the configuration, walks the search
/// result pages to collect listing identifiers, then enriches them batch by batch
/// into the day's CSV file.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Optional configuration file as the first argument
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config =
        CrawlerConfig::load(config_path.as_deref()).context("failed to load configuration")?;

    let start_time = Instant::now();
    let today = chrono::Local::now().date_naive();
    let window = config.search.stay_window(today);
    let search_url = SearchQuery::new(&config.search, window).url()?;
    info!("Search URL: {}", search_url);

    let extractor = RoomLinkExtractor::from_config(&config.traversal)?;
    let resolver = PaginationNextLink::from_config(&config.traversal);

    let mut browser = driver::connect(&config.browser)
        .await
        .context("failed to start the browser driver")?;
    let traversal = Traverser::new(
        browser.as_mut(),
        config.traversal.clone(),
        config.show_progress,
    )
    .traverse(&search_url, &extractor, &resolver)
        .await;
    if let Err(e) = browser.shutdown().await {
        warn!("Browser shutdown failed: {}", e);
    }
    let listings = traversal.context("traversal aborted, nothing was enriched")?;

    info!("Unique listings found: {}", listings.len());

    let output_path = config.output.file_path(today);
    let sink = CsvStream::open_append(&output_path)
        .with_context(|| format!("failed to open {}", output_path.display()))?
        .with_schema(config.enrichment.expected_fields.clone());

    let client = EnrichmentClient::new(&config.enrichment, window)?;
    let (summary, _) = EnrichmentPipeline::new(&client, &config.enrichment, config.show_progress)
        .run(&listings, sink)
        .await
        .context("failed writing enriched records")?;

    info!(
        "Saved {} rows to {} in {:.2?} ({} of {} batches failed)",
        summary.rows_written,
        output_path.display(),
        start_time.elapsed(),
        summary.failed,
        summary.batches
    );

    Ok(())
}
