use crate::{EnrichedRecord, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// The `CsvStream` appends enriched records to a CSV destination batch by batch.
///
/// The header is written once, right before the first rows. Its field list is
/// either declared up front or taken from the first batch that carries records;
/// every later batch is projected onto it so all rows line up with the header.
pub struct CsvStream<W: Write> {
    writer: csv::Writer<W>,
    schema: Option<Vec<String>>,
    header_written: bool,
    rows_written: usize,
}

impl CsvStream<File> {
    /// Opens `path` for appending, creating it and its parent directory if needed.
    ///
    /// # Arguments
    ///
    /// * `path` - The output file.
    ///
    /// # Returns
    ///
    /// A `Result` containing the stream, or an I/O error.
    pub fn open_append(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!("Opened {} for appending", path.display());
        Ok(Self::new(file))
    }
}

impl<W: Write> CsvStream<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .terminator(csv::Terminator::Any(b'\n'))
                .from_writer(writer),
            schema: None,
            header_written: false,
            rows_written: 0,
        }
    }

    /// Fixes the header to `fields` instead of inferring it from the first batch.
    /// An empty list keeps inference.
    pub fn with_schema(mut self, fields: Vec<String>) -> Self {
        if !fields.is_empty() {
            self.schema = Some(fields);
        }
        self
    }

    pub fn header(&self) -> Option<&[String]> {
        self.schema.as_deref()
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Encodes `records` as rows and flushes them to the destination.
    ///
    /// # Arguments
    ///
    /// * `records` - One batch of records. The first record's keys are the batch's field set.
    ///
    /// # Returns
    ///
    /// A `Result` containing the number of data rows written.
    pub fn append_batch(&mut self, records: &[EnrichedRecord]) -> Result<usize> {
        let Some(first) = records.first() else {
            return Ok(0);
        };
        let batch_fields: Vec<String> = first.keys().cloned().collect();

        let schema = self.schema.get_or_insert_with(|| batch_fields.clone()).clone();
        check_fields(&schema, &batch_fields);

        if !self.header_written {
            self.writer.write_record(&schema)?;
            self.header_written = true;
        }

        for record in records {
            let row = schema
                .iter()
                .map(|field| record.get(field).map(cell).unwrap_or_default());
            self.writer.write_record(row)?;
        }
        self.writer.flush()?;

        self.rows_written += records.len();
        Ok(records.len())
    }

    /// Flushes and releases the destination.
    pub fn close(mut self) -> Result<W> {
        self.writer.flush()?;
        self.writer
            .into_inner()
            .map_err(|e| e.into_error().into())
    }
}

/// Warns when a batch's field set differs from the header.
fn check_fields(schema: &[String], batch_fields: &[String]) {
    let expected: HashSet<&str> = schema.iter().map(String::as_str).collect();
    let actual: HashSet<&str> = batch_fields.iter().map(String::as_str).collect();
    if expected == actual {
        return;
    }

    let mut missing: Vec<_> = expected.difference(&actual).copied().collect();
    let mut extra: Vec<_> = actual.difference(&expected).copied().collect();
    missing.sort_unstable();
    extra.sort_unstable();
    warn!(
        ?missing,
        ?extra,
        "Batch fields differ from the CSV header; missing cells are left empty and extra fields dropped"
    );
}

/// Renders one JSON value as a CSV cell.
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
