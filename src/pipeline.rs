use crate::config::EnrichmentConfig;
use crate::enrich::EnrichmentSource;
use crate::output::CsvStream;
use crate::{ListingId, ListingSet, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Counts reported by one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Requests issued.
    pub batches: usize,
    /// Batches that produced at least one row.
    pub succeeded: usize,
    /// Batches answered with an empty array.
    pub empty: usize,
    /// Batches whose request failed.
    pub failed: usize,
    /// Data rows appended to the output.
    pub rows_written: usize,
    /// Identifiers of the failed batches.
    pub failed_listings: Vec<ListingId>,
}

/// The `EnrichmentPipeline` turns the frozen listing set into CSV rows, one
/// request per batch, strictly one batch at a time.
pub struct EnrichmentPipeline<'a> {
    source: &'a dyn EnrichmentSource,
    batch_size: usize,
    delay: Duration,
    progress: bool,
}

impl<'a> EnrichmentPipeline<'a> {
    /// Creates a new `EnrichmentPipeline`.
    ///
    /// # Arguments
    ///
    /// * `source` - Where the records come from.
    /// * `config` - Batch size and the pause between requests.
    /// * `show_progress` - Whether to draw a progress bar.
    pub fn new(
        source: &'a dyn EnrichmentSource,
        config: &EnrichmentConfig,
        show_progress: bool,
    ) -> Self {
        Self {
            source,
            batch_size: config.batch_size.max(1),
            delay: config.inter_batch_delay(),
            progress: show_progress,
        }
    }

    /// Enriches every identifier and streams the records into `sink`, which is closed at the end.
    ///
    /// A failed or empty batch is logged and skipped; it never aborts the run or
    /// touches rows already written. Only writing to `sink` can fail the run.
    ///
    /// # Returns
    ///
    /// A `Result` containing the run's counts and the released destination.
    #[instrument(skip_all, fields(listings = listings.len(), batch_size = self.batch_size))]
    pub async fn run<W: Write>(
        &self,
        listings: &ListingSet,
        mut sink: CsvStream<W>,
    ) -> Result<(PipelineSummary, W)> {
        let batches = listings.batches(self.batch_size);
        let progress = self.progress_bar(batches.len() as u64);
        let mut summary = PipelineSummary::default();

        for (index, batch) in batches.iter().enumerate() {
            if index > 0 {
                sleep(self.delay).await;
            }

            let ids = join_ids(batch);
            progress.set_message(ids.clone());
            summary.batches += 1;

            match self.source.fetch(batch).await {
                Ok(records) if records.is_empty() => {
                    warn!("Enrichment returned no records for listings {}", ids);
                    summary.empty += 1;
                }
                Ok(records) => {
                    let rows = sink.append_batch(&records)?;
                    debug!("Wrote {} rows for listings {}", rows, ids);
                    summary.succeeded += 1;
                    summary.rows_written += rows;
                }
                Err(e) => {
                    error!("Enrichment failed for listings {}: {}", ids, e);
                    summary.failed += 1;
                    summary.failed_listings.extend(batch.iter().cloned());
                }
            }

            progress.inc(1);
        }

        let output = sink.close()?;
        progress.finish_with_message(format!(
            "{} rows written, {} failed batches",
            summary.rows_written, summary.failed
        ));
        info!(
            batches = summary.batches,
            succeeded = summary.succeeded,
            empty = summary.empty,
            failed = summary.failed,
            rows = summary.rows_written,
            "Enrichment finished"
        );

        Ok((summary, output))
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:30}] {pos}/{len} {msg}")
        {
            bar.set_style(style);
        }
        bar
    }
}

fn join_ids(batch: &[ListingId]) -> String {
    batch
        .iter()
        .map(ListingId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
