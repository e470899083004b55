use async_trait::async_trait;
use listing_crawler::{
    config::{EnrichmentConfig, TraversalConfig},
    driver::{BrowserDriver, HtmlPage, PageHandle},
    enrich::{EnrichmentClient, EnrichmentSource},
    extract::{PaginationNextLink, RoomLinkExtractor},
    output::CsvStream,
    pipeline::EnrichmentPipeline,
    traversal::Traverser,
    CrawlerError, EnrichedRecord, ListingId, ListingSet, Result, StayWindow,
};
use chrono::NaiveDate;
use mockito::Matcher;
use serde_json::json;
use std::collections::{HashMap, HashSet};

const START_URL: &str =
    "https://www.airbnb.cl/s/Santiago/homes?checkin=2024-01-01&checkout=2024-01-09";

/// Serves canned result pages and records every render.
struct StubDriver {
    pages: HashMap<String, String>,
    renders: Vec<String>,
}

impl StubDriver {
    /// Chains `pages` so that page N links to page N+1 through the pagination nav.
    fn chain(pages: &[&[&str]]) -> Self {
        let urls: Vec<String> = (0..pages.len())
            .map(|i| {
                if i == 0 {
                    START_URL.to_string()
                } else {
                    format!("{START_URL}&items_offset={}", i * 18)
                }
            })
            .collect();

        let pages = pages
            .iter()
            .enumerate()
            .map(|(i, ids)| {
                let mut html = String::from("<html><body>");
                for id in ids.iter() {
                    html.push_str(&format!(r#"<a href="/rooms/{id}?adults=2">Listing {id}</a>"#));
                }
                html.push_str(r#"<nav aria-label="Paginación de los resultados de búsqueda">"#);
                if let Some(next) = urls.get(i + 1) {
                    let href = next.replace('&', "&amp;");
                    html.push_str(&format!(r#"<a aria-label="Siguiente" href="{href}">›</a>"#));
                }
                html.push_str("</nav></body></html>");
                (urls[i].clone(), html)
            })
            .collect();

        Self {
            pages,
            renders: Vec::new(),
        }
    }
}

#[async_trait]
impl BrowserDriver for StubDriver {
    async fn render(&mut self, url: &str) -> Result<Box<dyn PageHandle>> {
        self.renders.push(url.to_string());
        let html = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| CrawlerError::NavigationError {
                url: url.to_string(),
                reason: "404".to_string(),
            })?;
        Ok(Box::new(HtmlPage::new(url, html)))
    }
}

/// Returns one `{"id", "price"}` record per identifier, except for listed failures.
struct PricingSource {
    failing: HashSet<String>,
}

#[async_trait]
impl EnrichmentSource for PricingSource {
    async fn fetch(&self, batch: &[ListingId]) -> Result<Vec<EnrichedRecord>> {
        if batch.iter().any(|id| self.failing.contains(id.as_str())) {
            return Err(CrawlerError::EnrichmentError("HTTP 502".to_string()));
        }
        Ok(batch
            .iter()
            .map(|id| {
                serde_json::from_value(json!({"id": id.as_str(), "price": 100})).unwrap()
            })
            .collect())
    }
}

fn traversal_config() -> TraversalConfig {
    TraversalConfig {
        element_wait_ms: 0,
        poll_interval_ms: 1,
        settle_delay_ms: 0,
        ..TraversalConfig::default()
    }
}

fn enrichment_config(batch_size: usize) -> EnrichmentConfig {
    EnrichmentConfig {
        batch_size,
        inter_batch_delay_ms: 0,
        ..EnrichmentConfig::default()
    }
}

async fn traverse(driver: &mut StubDriver) -> Result<ListingSet> {
    traverse_with(driver, traversal_config()).await
}

async fn traverse_with(driver: &mut StubDriver, config: TraversalConfig) -> Result<ListingSet> {
    let extractor = RoomLinkExtractor::from_config(&config)?;
    let resolver = PaginationNextLink::from_config(&config);
    Traverser::new(driver, config, false)
        .traverse(START_URL, &extractor, &resolver)
        .await
}

fn listings(raw: &[&str]) -> ListingSet {
    raw.iter().filter_map(|s| ListingId::new(*s)).collect()
}

#[tokio::test]
async fn test_two_page_scenario_end_to_end() {
    let mut driver = StubDriver::chain(&[&["111", "222"], &["222", "333"]]);

    let found = traverse(&mut driver).await.unwrap();
    assert_eq!(found, listings(&["111", "222", "333"]));
    assert_eq!(driver.renders.len(), 2);

    let source = PricingSource {
        failing: HashSet::new(),
    };
    let (summary, output) = EnrichmentPipeline::new(&source, &enrichment_config(1), false)
        .run(&found, CsvStream::new(Vec::new()))
        .await
        .unwrap();

    assert_eq!(summary.rows_written, 3);
    assert_eq!(
        String::from_utf8(output).unwrap(),
        "id,price\n111,100\n222,100\n333,100\n"
    );
}

#[tokio::test]
async fn test_traversal_renders_each_page_of_the_chain_once() {
    let mut driver = StubDriver::chain(&[&["1"], &["2"], &["3"]]);

    traverse(&mut driver).await.unwrap();

    assert_eq!(driver.renders.len(), 3);
    assert_eq!(driver.renders[0], START_URL);
}

#[tokio::test]
async fn test_max_pages_caps_the_walk() {
    let mut driver = StubDriver::chain(&[&["1"], &["2"], &["3"]]);
    let config = TraversalConfig {
        max_pages: Some(2),
        ..traversal_config()
    };

    let found = traverse_with(&mut driver, config).await.unwrap();

    assert_eq!(found, listings(&["1", "2"]));
    assert_eq!(driver.renders.len(), 2);
}

#[tokio::test]
async fn test_set_size_equals_distinct_identifiers_across_pages() {
    let pages: &[&[&str]] = &[
        &["10", "11", "12"],
        &["12", "12", "13"],
        &["10", "14"],
        &[],
        &["11", "13", "15"],
    ];
    let distinct: HashSet<&str> = pages.iter().flat_map(|p| p.iter().copied()).collect();
    let mut driver = StubDriver::chain(pages);

    let found = traverse(&mut driver).await.unwrap();

    assert_eq!(found.len(), distinct.len());
    assert!(distinct.iter().all(|id| found.contains(id)));
}

#[tokio::test]
async fn test_missing_page_aborts_before_enrichment() {
    let mut driver = StubDriver::chain(&[&["1"], &["2"]]);
    driver.pages.retain(|url, _| url == START_URL);

    let result = traverse(&mut driver).await;

    assert!(matches!(result, Err(CrawlerError::NavigationError { .. })));
    assert_eq!(driver.renders.len(), 2);
}

#[tokio::test]
async fn test_row_count_matches_identifiers_for_any_batch_size() {
    let found = listings(&["1", "2", "3", "4", "5", "6", "7"]);
    let source = PricingSource {
        failing: HashSet::new(),
    };

    for batch_size in [1, 2, 3, 7, 10] {
        let (summary, output) =
            EnrichmentPipeline::new(&source, &enrichment_config(batch_size), false)
                .run(&found, CsvStream::new(Vec::new()))
                .await
                .unwrap();

        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.lines().count(), found.len() + 1, "batch size {batch_size}");
        assert_eq!(summary.batches, found.len().div_ceil(batch_size));
    }
}

#[tokio::test]
async fn test_failed_first_batch_contributes_no_rows() {
    let found = listings(&["1", "2", "3", "4"]);
    let source = PricingSource {
        failing: HashSet::from(["1".to_string()]),
    };

    let (summary, output) = EnrichmentPipeline::new(&source, &enrichment_config(2), false)
        .run(&found, CsvStream::new(Vec::new()))
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(
        String::from_utf8(output).unwrap(),
        "id,price\n3,100\n4,100\n"
    );
}

#[tokio::test]
async fn test_http_enrichment_streams_to_dated_file() {
    let mut server = mockito::Server::new_async().await;
    for id in ["111", "222"] {
        server
            .mock("GET", "/scraper")
            .match_query(Matcher::UrlEncoded("idarirbnb".into(), id.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!([{"id": id, "price": 100}]).to_string())
            .create_async()
            .await;
    }
    server
        .mock("GET", "/scraper")
        .match_query(Matcher::UrlEncoded("idarirbnb".into(), "333".into()))
        .with_status(500)
        .create_async()
        .await;

    let config = EnrichmentConfig {
        endpoint: format!("{}/scraper", server.url()),
        ..enrichment_config(1)
    };
    let window = StayWindow::starting(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 8);
    let client = EnrichmentClient::new(&config, window).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("listings_2024-01-01.csv");
    let sink = CsvStream::open_append(&path).unwrap();

    let (summary, _) = EnrichmentPipeline::new(&client, &config, false)
        .run(&listings(&["111", "222", "333"]), sink)
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_listings, vec![ListingId::new("333").unwrap()]);
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "id,price\n111,100\n222,100\n"
    );
}
