//! The connector contract shared by every format adapter.
//!
//! A connector owns one transport for its lifetime. `extract` may be called
//! repeatedly; `close` releases the transport and is safe to call twice.
//! Every adapter funnels its batch through [`RunContext::finish`], which
//! normalizes the row set, hashes it, validates it against the schema, and
//! stamps the run metadata.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use govingest_core::config::{HttpConfig, IngestConfig, PaginationConfig};
use govingest_core::contract::{SourceContract, SourceKind};
use govingest_core::error::{ConnectionError, Result};
use govingest_core::hash::content_hash;
use govingest_core::record::{ExtractionMetadata, ExtractionResult, RecordBatch, RunStats};
use govingest_core::validate::SchemaValidator;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::transport::Fetcher;

/// Per-call parameters. Overrides the contract endpoint and adds query
/// parameters to the first request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractParams {
    pub url: Option<String>,
    pub query: BTreeMap<String, String>,
}

impl ExtractParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }
}

/// Trait implemented by every format adapter.
#[async_trait]
pub trait Connector: Send {
    /// The contract's source name.
    fn name(&self) -> &str;

    /// The source type this connector handles.
    fn kind(&self) -> SourceKind;

    /// Run one extraction.
    async fn extract(&mut self, params: &ExtractParams) -> Result<ExtractionResult>;

    /// Run one extraction per logical unit of the source. Only spreadsheets
    /// have more than one unit (their sheets).
    async fn extract_all(&mut self, params: &ExtractParams) -> Result<Vec<ExtractionResult>> {
        Ok(vec![self.extract(params).await?])
    }

    /// Release the transport. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Extract once and close the connector whether or not extraction succeeded.
pub async fn extract_and_close(
    connector: &mut dyn Connector,
    params: &ExtractParams,
) -> Result<ExtractionResult> {
    let result = connector.extract(params).await;
    connector.close();
    result
}

/// [`Connector::extract_all`] followed by an unconditional close.
pub async fn extract_all_and_close(
    connector: &mut dyn Connector,
    params: &ExtractParams,
) -> Result<Vec<ExtractionResult>> {
    let results = connector.extract_all(params).await;
    connector.close();
    results
}

/// Runtime settings every connector needs, taken from [`IngestConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConnectorSettings {
    pub http: HttpConfig,
    pub pagination: PaginationConfig,
    pub null_tolerance: f64,
}

impl From<&IngestConfig> for ConnectorSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            http: config.http.clone(),
            pagination: config.pagination.clone(),
            null_tolerance: config.validation.null_tolerance,
        }
    }
}

impl ConnectorSettings {
    pub fn validator(&self) -> SchemaValidator {
        SchemaValidator::new(self.null_tolerance)
    }

    /// Request timeout for a source type: files get the longer budget.
    pub fn timeout_for(&self, kind: SourceKind) -> Duration {
        match kind {
            SourceKind::WebTable | SourceKind::PagedApi => self.http.timeout(),
            SourceKind::Delimited | SourceKind::Spreadsheet | SourceKind::Document => {
                self.http.file_timeout()
            }
        }
    }
}

/// The transport slot of a connector. Emptied by `close`.
pub(crate) struct FetchScope {
    source_name: String,
    fetcher: Option<Box<dyn Fetcher>>,
}

impl FetchScope {
    pub(crate) fn new(source_name: &str, fetcher: Box<dyn Fetcher>) -> Self {
        Self {
            source_name: source_name.to_string(),
            fetcher: Some(fetcher),
        }
    }

    pub(crate) fn get(&self) -> std::result::Result<&dyn Fetcher, ConnectionError> {
        self.fetcher
            .as_deref()
            .ok_or_else(|| ConnectionError::Closed {
                source_name: self.source_name.clone(),
            })
    }

    pub(crate) fn close(&mut self) {
        if self.fetcher.take().is_some() {
            debug!(source = %self.source_name, "Connector closed");
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.fetcher.is_none()
    }
}

/// Optional metadata a format contributes to the result.
#[derive(Debug, Clone, Default)]
pub(crate) struct MetadataExtras {
    pub file_hash: Option<String>,
    pub sheet_name: Option<String>,
    pub file_type: Option<String>,
}

/// Book-keeping for one `extract` call. The timestamp is taken once so every
/// row (and every sheet) of the run shares it.
pub(crate) struct RunContext {
    source_name: String,
    extracted_at: DateTime<Utc>,
    started: Instant,
    pages_fetched: usize,
    bytes_read: u64,
}

impl RunContext {
    pub(crate) fn start(source_name: &str, kind: SourceKind) -> Self {
        info!(source = source_name, kind = %kind, "Starting extraction");
        Self {
            source_name: source_name.to_string(),
            extracted_at: Utc::now(),
            started: Instant::now(),
            pages_fetched: 0,
            bytes_read: 0,
        }
    }

    pub(crate) fn record_fetch(&mut self, bytes: usize) {
        self.pages_fetched += 1;
        self.bytes_read += bytes as u64;
    }

    pub(crate) fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Normalize, hash, validate, and wrap a batch.
    pub(crate) fn finish(
        &self,
        contract: &SourceContract,
        validator: &SchemaValidator,
        mut batch: RecordBatch,
        extras: MetadataExtras,
    ) -> Result<ExtractionResult> {
        batch.normalize();
        let report = validator.validate(&self.source_name, &batch, &contract.schema)?;
        let content_hash = content_hash(&batch);

        let stats = RunStats {
            row_count: batch.len(),
            column_count: batch.columns().len(),
            pages_fetched: self.pages_fetched,
            bytes_read: self.bytes_read,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            null_warnings: report.warnings,
        };
        info!(
            source = %self.source_name,
            rows = stats.row_count,
            columns = %column_list(batch.columns()),
            pages = stats.pages_fetched,
            elapsed_ms = stats.elapsed_ms,
            hash = %content_hash,
            sheet = extras.sheet_name.as_deref().unwrap_or(""),
            "Extraction complete"
        );

        let metadata = ExtractionMetadata {
            source_name: self.source_name.clone(),
            extracted_at: self.extracted_at,
            content_hash,
            file_hash: extras.file_hash,
            sheet_name: extras.sheet_name,
            file_type: extras.file_type,
        };
        Ok(ExtractionResult::new(batch, metadata, stats))
    }
}

/// Column names as one log field.
fn column_list(columns: &[String]) -> String {
    format!("[{}]", columns.join(", "))
}

/// Sleep between page requests; zero means no delay.
pub(crate) async fn courtesy_delay(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
