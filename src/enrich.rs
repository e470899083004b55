use crate::config::EnrichmentConfig;
use crate::{CrawlerError, EnrichedRecord, ListingId, Result, StayWindow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument};

/// A source of additional data for a batch of listings.
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    /// Fetches the records for `batch`. An empty vector is a valid answer.
    async fn fetch(&self, batch: &[ListingId]) -> Result<Vec<EnrichedRecord>>;
}

/// The `EnrichmentClient` queries an HTTP endpoint with one repeated id
/// parameter per listing plus the shared check-in/check-out dates, and expects
/// a JSON array of records back.
pub struct EnrichmentClient {
    /// The HTTP client used for making requests.
    client: Client,
    endpoint: String,
    id_param: String,
    window: StayWindow,
}

impl EnrichmentClient {
    /// Creates a new `EnrichmentClient`.
    ///
    /// # Arguments
    ///
    /// * `config` - The enrichment section of the configuration.
    /// * `window` - The dates sent with every request.
    ///
    /// # Returns
    ///
    /// A `Result` containing the client, or an error if the HTTP client could not be created.
    pub fn new(config: &EnrichmentConfig, window: StayWindow) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            id_param: config.id_param.clone(),
            window,
        })
    }

    /// Builds the request for `batch`, e.g. `...?idarirbnb=1&idarirbnb=2&checkin=...&checkout=...`.
    pub fn request(&self, batch: &[ListingId]) -> Result<reqwest::Request> {
        let checkin = self.window.checkin_param();
        let checkout = self.window.checkout_param();

        let mut params: Vec<(&str, &str)> = batch
            .iter()
            .map(|id| (self.id_param.as_str(), id.as_str()))
            .collect();
        params.push(("checkin", checkin.as_str()));
        params.push(("checkout", checkout.as_str()));

        Ok(self.client.get(&self.endpoint).query(&params).build()?)
    }
}

#[async_trait]
impl EnrichmentSource for EnrichmentClient {
    #[instrument(skip(self, batch), fields(batch_len = batch.len()))]
    async fn fetch(&self, batch: &[ListingId]) -> Result<Vec<EnrichedRecord>> {
        let request = self.request(batch)?;
        info!("Querying enrichment API: {}", request.url());

        let response = self.client.execute(request).await?;
        let status = response.status();
        debug!("Response status: {}", status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CrawlerError::EnrichmentError(format!(
                "HTTP {}: {}",
                status,
                body.trim()
            )));
        }

        response
            .json::<Vec<EnrichedRecord>>()
            .await
            .map_err(|e| {
                if e.is_decode() {
                    CrawlerError::EnrichmentError(format!("expected a JSON array of records: {e}"))
                } else {
                    e.into()
                }
            })
    }
}
