//! Document (PDF / DOCX) connector.
//!
//! Extraction is tiered. Tables come first; when the document has none, or
//! table extraction fails, the full text is read and the contract's regex
//! rules produce one single-field record per match. A failure of the text
//! tier is fatal.

mod docx;
mod pdf;
pub mod rules;

use async_trait::async_trait;
use bytes::Bytes;
use govingest_core::contract::{DocumentOptions, ParsingOptions, SourceContract, SourceKind};
use govingest_core::error::{ContractError, ParseError, Result};
use govingest_core::hash::file_hash;
use govingest_core::record::{ExtractionResult, RawRow, RecordBatch, Value};
use govingest_core::validate::SchemaValidator;
use tracing::{debug, info, warn};

use crate::connector::{
    Connector, ConnectorSettings, ExtractParams, FetchScope, MetadataExtras, RunContext,
};
use crate::transport::{Fetcher, HttpFetcher, Location, read_location};
use rules::{CompiledRule, apply_rules};

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentType {
    Pdf,
    Docx,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Pdf => "pdf",
            DocumentType::Docx => "docx",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim().trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Some(DocumentType::Pdf),
            "docx" => Some(DocumentType::Docx),
            _ => None,
        }
    }

    fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(DocumentType::Pdf)
        } else if bytes.starts_with(b"PK\x03\x04") {
            Some(DocumentType::Docx)
        } else {
            None
        }
    }

    /// A declared type is authoritative. Otherwise the file extension is
    /// used, then the leading magic bytes.
    pub fn detect(
        declared: Option<&str>,
        location: &Location,
        bytes: &[u8],
    ) -> std::result::Result<Self, ParseError> {
        if let Some(declared) = declared {
            return Self::from_extension(declared).ok_or_else(|| ParseError::UnsupportedFileType {
                file_type: declared.to_string(),
            });
        }
        let extension = location
            .file_name()
            .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_string()));
        extension
            .as_deref()
            .and_then(Self::from_extension)
            .or_else(|| Self::sniff(bytes))
            .ok_or_else(|| ParseError::UnsupportedFileType {
                file_type: extension.unwrap_or_else(|| "unknown".to_string()),
            })
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A table recovered from a document: header cells plus data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TextTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TextTable {
    /// First row is the header. `None` when there is no usable header.
    pub(crate) fn from_rows(mut rows: Vec<Vec<String>>) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let header = rows.remove(0);
        if header.iter().all(|h| h.trim().is_empty()) {
            return None;
        }
        Some(Self { header, rows })
    }
}

/// Concatenate tables into one batch. Rows whose cell count differs from the
/// header are skipped.
fn tables_to_batch(tables: Vec<TextTable>) -> RecordBatch {
    let mut batch = RecordBatch::new();
    for table in tables {
        let columns: Vec<String> = table
            .header
            .iter()
            .enumerate()
            .map(|(i, h)| match h.trim() {
                "" => format!("Unnamed: {i}"),
                name => name.to_string(),
            })
            .collect();
        let mut part = RecordBatch::with_columns(columns.clone());
        for cells in table.rows {
            if cells.len() != columns.len() {
                debug!(expected = columns.len(), found = cells.len(), "Skipping ragged table row");
                continue;
            }
            let row: RawRow = columns
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    (column.clone(), Value::text(cells[i].trim()))
                })
                .collect();
            part.push(row);
        }
        batch.extend(part);
    }
    batch
}

fn tables_of(bytes: &[u8], doc_type: DocumentType) -> std::result::Result<Vec<TextTable>, ParseError> {
    match doc_type {
        DocumentType::Pdf => pdf::extract_tables(bytes),
        DocumentType::Docx => Ok(docx::read_docx(bytes)?.tables),
    }
}

fn text_of(bytes: &[u8], doc_type: DocumentType) -> std::result::Result<String, ParseError> {
    match doc_type {
        DocumentType::Pdf => pdf::full_text(bytes),
        DocumentType::Docx => Ok(docx::read_docx(bytes)?.text()),
    }
}

/// Run the extraction tiers over a loaded document.
pub(crate) fn parse_document(
    bytes: &[u8],
    doc_type: DocumentType,
    rules: &[CompiledRule],
) -> std::result::Result<RecordBatch, ParseError> {
    match tables_of(bytes, doc_type) {
        Ok(tables) => {
            let count = tables.len();
            let batch = tables_to_batch(tables);
            if !batch.is_empty() {
                debug!(file_type = %doc_type, tables = count, "Using document tables");
                return Ok(batch);
            }
            debug!(file_type = %doc_type, tables = count, "No table rows found, applying text rules");
        }
        Err(e) => warn!(file_type = %doc_type, error = %e, "Table extraction failed, applying text rules"),
    }

    let text = text_of(bytes, doc_type)?;
    let mut batch = RecordBatch::new();
    for record in apply_rules(&text, rules) {
        batch.push(record);
    }
    Ok(batch)
}

pub struct DocumentConnector {
    contract: SourceContract,
    options: DocumentOptions,
    rules: Vec<CompiledRule>,
    validator: SchemaValidator,
    scope: FetchScope,
}

impl DocumentConnector {
    pub fn new(contract: SourceContract, settings: &ConnectorSettings) -> Result<Self> {
        let fetcher = HttpFetcher::new(
            &settings.http,
            settings.timeout_for(SourceKind::Document),
            contract.auth.as_ref(),
        )?;
        Self::with_fetcher(contract, settings, Box::new(fetcher))
    }

    pub fn with_fetcher(
        contract: SourceContract,
        settings: &ConnectorSettings,
        fetcher: Box<dyn Fetcher>,
    ) -> Result<Self> {
        let ParsingOptions::Document(options) = contract.parsing.clone() else {
            return Err(ContractError::Invalid {
                source_name: contract.source_name.clone(),
                message: format!("expected document options, got {}", contract.kind()),
            }
            .into());
        };
        let rules = options
            .extraction_rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let scope = FetchScope::new(&contract.source_name, fetcher);
        Ok(Self {
            validator: settings.validator(),
            contract,
            options,
            rules,
            scope,
        })
    }
}

#[async_trait]
impl Connector for DocumentConnector {
    fn name(&self) -> &str {
        &self.contract.source_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Document
    }

    async fn extract(&mut self, params: &ExtractParams) -> Result<ExtractionResult> {
        let mut ctx = RunContext::start(&self.contract.source_name, SourceKind::Document);
        let fetcher = self.scope.get()?;
        let location = Location::parse(params.url.as_deref().unwrap_or(&self.contract.endpoint));
        let bytes: Bytes = read_location(fetcher, &location).await?;
        ctx.record_fetch(bytes.len());

        let doc_type = DocumentType::detect(self.options.file_type.as_deref(), &location, &bytes)?;
        let hash = file_hash(&bytes);

        // Parsing is CPU-bound and the PDF backend may panic on malformed input.
        let rules = self.rules.clone();
        let batch = tokio::task::spawn_blocking(move || parse_document(&bytes, doc_type, &rules))
            .await
            .map_err(|e| ParseError::Document {
                message: format!("{doc_type} parser aborted: {e}"),
            })??;
        info!(
            source = %self.contract.source_name,
            file_type = %doc_type,
            rows = batch.len(),
            "Parsed document"
        );

        ctx.finish(
            &self.contract,
            &self.validator,
            batch,
            MetadataExtras {
                file_hash: Some(hash),
                sheet_name: None,
                file_type: Some(doc_type.to_string()),
            },
        )
    }

    fn close(&mut self) {
        self.scope.close();
    }

    fn is_closed(&self) -> bool {
        self.scope.is_closed()
    }
}
