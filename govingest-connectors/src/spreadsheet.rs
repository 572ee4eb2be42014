//! Spreadsheet (XLSX/XLS/ODS) connector backed by calamine.
//!
//! `extract` reads one sheet chosen by index or name. `extract_all` reads
//! every sheet, skips the empty ones, and tags each result with its sheet
//! name.

use async_trait::async_trait;
use calamine::{Data, Range, Reader, Sheets, open_workbook_auto_from_rs};
use chrono::{NaiveDate, NaiveDateTime};
use govingest_core::contract::{
    ParsingOptions, SheetSelector, SourceContract, SourceKind, SpreadsheetOptions,
};
use govingest_core::error::{ContractError, ParseError, Result};
use govingest_core::hash::file_hash;
use govingest_core::record::{ExtractionResult, RawRow, RecordBatch, Value};
use govingest_core::validate::SchemaValidator;
use std::io::Cursor;
use tracing::{debug, info};

use crate::connector::{
    Connector, ConnectorSettings, ExtractParams, FetchScope, MetadataExtras, RunContext,
};
use crate::transport::{Fetcher, HttpFetcher, Location, read_location};

type Workbook = Sheets<Cursor<Vec<u8>>>;

pub struct SpreadsheetConnector {
    contract: SourceContract,
    options: SpreadsheetOptions,
    validator: SchemaValidator,
    scope: FetchScope,
}

/// A loaded workbook file.
struct Download {
    bytes: Vec<u8>,
    file_hash: String,
}

impl SpreadsheetConnector {
    pub fn new(contract: SourceContract, settings: &ConnectorSettings) -> Result<Self> {
        let fetcher = HttpFetcher::new(
            &settings.http,
            settings.timeout_for(SourceKind::Spreadsheet),
            contract.auth.as_ref(),
        )?;
        Self::with_fetcher(contract, settings, Box::new(fetcher))
    }

    pub fn with_fetcher(
        contract: SourceContract,
        settings: &ConnectorSettings,
        fetcher: Box<dyn Fetcher>,
    ) -> Result<Self> {
        let ParsingOptions::Spreadsheet(options) = contract.parsing.clone() else {
            return Err(ContractError::Invalid {
                source_name: contract.source_name.clone(),
                message: format!("expected spreadsheet options, got {}", contract.kind()),
            }
            .into());
        };
        let scope = FetchScope::new(&contract.source_name, fetcher);
        Ok(Self {
            validator: settings.validator(),
            contract,
            options,
            scope,
        })
    }

    async fn download(&self, params: &ExtractParams, ctx: &mut RunContext) -> Result<Download> {
        let fetcher = self.scope.get()?;
        let location = Location::parse(params.url.as_deref().unwrap_or(&self.contract.endpoint));
        let bytes = read_location(fetcher, &location).await?;
        ctx.record_fetch(bytes.len());
        let hash = file_hash(&bytes);
        debug!(source = %self.contract.source_name, location = %location, file_hash = %hash, "Read workbook");
        Ok(Download {
            bytes: bytes.to_vec(),
            file_hash: hash,
        })
    }

    fn finish_sheet(
        &self,
        ctx: &RunContext,
        sheet: String,
        mut batch: RecordBatch,
        file_hash: &str,
    ) -> Result<ExtractionResult> {
        info!(
            source = %self.contract.source_name,
            sheet = %sheet,
            rows = batch.len(),
            "Parsed sheet"
        );
        batch.rename_columns(&self.options.data_mapping);
        ctx.finish(
            &self.contract,
            &self.validator,
            batch,
            MetadataExtras {
                file_hash: Some(file_hash.to_string()),
                sheet_name: Some(sheet),
                file_type: None,
            },
        )
    }
}

#[async_trait]
impl Connector for SpreadsheetConnector {
    fn name(&self) -> &str {
        &self.contract.source_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Spreadsheet
    }

    async fn extract(&mut self, params: &ExtractParams) -> Result<ExtractionResult> {
        let mut ctx = RunContext::start(&self.contract.source_name, SourceKind::Spreadsheet);
        let download = self.download(params, &mut ctx).await?;
        let selector = self.options.sheet_name.clone();
        let header_row = self.options.header_row;
        let bytes = download.bytes;
        let (sheet, batch) =
            parse_blocking(move || read_sheet(bytes, &selector, header_row)).await?;
        self.finish_sheet(&ctx, sheet, batch, &download.file_hash)
    }

    async fn extract_all(&mut self, params: &ExtractParams) -> Result<Vec<ExtractionResult>> {
        let mut ctx = RunContext::start(&self.contract.source_name, SourceKind::Spreadsheet);
        let download = self.download(params, &mut ctx).await?;
        let header_row = self.options.header_row;
        let bytes = download.bytes;
        let sheets = parse_blocking(move || read_all_sheets(bytes, header_row)).await?;
        let mut results = Vec::with_capacity(sheets.len());
        for (sheet, batch) in sheets {
            results.push(self.finish_sheet(&ctx, sheet, batch, &download.file_hash)?);
        }
        Ok(results)
    }

    fn close(&mut self) {
        self.scope.close();
    }

    fn is_closed(&self) -> bool {
        self.scope.is_closed()
    }
}

/// Run a workbook parse off the async executor.
async fn parse_blocking<T, F>(parse: F) -> std::result::Result<T, ParseError>
where
    F: FnOnce() -> std::result::Result<T, ParseError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(parse)
        .await
        .map_err(|e| ParseError::Spreadsheet {
            message: format!("workbook parser aborted: {e}"),
        })?
}

fn open(bytes: Vec<u8>) -> std::result::Result<Workbook, ParseError> {
    open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(|e| ParseError::Spreadsheet {
        message: e.to_string(),
    })
}

fn range_of(workbook: &mut Workbook, sheet: &str) -> std::result::Result<Range<Data>, ParseError> {
    workbook
        .worksheet_range(sheet)
        .map_err(|e| ParseError::Spreadsheet {
            message: format!("sheet '{sheet}': {e}"),
        })
}

/// Read the selected sheet into a batch.
pub(crate) fn read_sheet(
    bytes: Vec<u8>,
    selector: &SheetSelector,
    header_row: usize,
) -> std::result::Result<(String, RecordBatch), ParseError> {
    let mut workbook = open(bytes)?;
    let names = workbook.sheet_names();
    let name = match selector {
        SheetSelector::Index(i) => names.get(*i).cloned(),
        SheetSelector::Name(wanted) => names.iter().find(|n| *n == wanted).cloned(),
    }
    .ok_or_else(|| ParseError::SheetNotFound {
        sheet: selector.to_string(),
    })?;
    let range = range_of(&mut workbook, &name)?;
    Ok((name, range_to_batch(&range, header_row)))
}

/// Read every sheet that has at least one data row.
pub(crate) fn read_all_sheets(
    bytes: Vec<u8>,
    header_row: usize,
) -> std::result::Result<Vec<(String, RecordBatch)>, ParseError> {
    let mut workbook = open(bytes)?;
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = range_of(&mut workbook, &name)?;
        let batch = range_to_batch(&range, header_row);
        if batch.is_empty() {
            debug!(sheet = %name, "Skipping empty sheet");
            continue;
        }
        sheets.push((name, batch));
    }
    Ok(sheets)
}

/// Convert a sheet range to a batch. `header_row` is a zero-based sheet row;
/// rows above it are ignored and fully blank data rows are dropped.
pub(crate) fn range_to_batch(range: &Range<Data>, header_row: usize) -> RecordBatch {
    let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    let first_col = range.start().map(|(_, col)| col as usize).unwrap_or(0);
    let skip = header_row.saturating_sub(first_row);
    let mut rows = range.rows().skip(skip);

    let Some(header) = rows.next() else {
        return RecordBatch::new();
    };
    let mut columns: Vec<String> = Vec::with_capacity(header.len());
    for (i, cell) in header.iter().enumerate() {
        let base = match header_text(cell) {
            Some(text) => text,
            None => format!("Unnamed: {}", first_col + i),
        };
        let mut name = base.clone();
        let mut suffix = 1;
        while columns.contains(&name) {
            name = format!("{base}.{suffix}");
            suffix += 1;
        }
        columns.push(name);
    }

    let mut batch = RecordBatch::with_columns(columns.clone());
    for cells in rows {
        if cells.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }
        let row: RawRow = columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let value = cells.get(i).map(cell_value).unwrap_or(Value::Null);
                (column.clone(), value)
            })
            .collect();
        batch.push(row);
    }
    batch
}

fn header_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Map a typed spreadsheet cell onto the record model.
pub(crate) fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::String(s) => Value::text(s.trim()),
        Data::Float(f) => Value::Number(*f),
        Data::Int(i) => Value::Number(*i as f64),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => dt.as_datetime().map(date_or_datetime).unwrap_or(Value::Null),
        Data::DateTimeIso(s) => parse_iso(s),
        Data::DurationIso(s) => Value::text(s.as_str()),
    }
}

fn date_or_datetime(dt: NaiveDateTime) -> Value {
    if dt.time() == chrono::NaiveTime::MIN {
        Value::Date(dt.date())
    } else {
        Value::DateTime(dt)
    }
}

fn parse_iso(s: &str) -> Value {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return date_or_datetime(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Value::Date(date);
    }
    Value::text(s)
}
