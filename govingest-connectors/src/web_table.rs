//! HTML table connector.
//!
//! Selects rows with the contract's row selector, pulls one cell per declared
//! field, coerces it by field kind, and follows "next page" links until the
//! link disappears, points back at a visited page, or the page limit is hit.

use async_trait::async_trait;
use govingest_core::coerce::{FieldKind, clean_value};
use govingest_core::contract::{
    ParsingOptions, SourceContract, SourceKind, WebTableOptions,
};
use govingest_core::error::{ContractError, ParseError, Result};
use govingest_core::record::{ExtractionResult, RawRow, RecordBatch};
use govingest_core::validate::SchemaValidator;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{info, warn};

use crate::connector::{
    Connector, ConnectorSettings, ExtractParams, FetchScope, MetadataExtras, RunContext,
    courtesy_delay,
};
use crate::pagination::PaginationState;
use crate::transport::{FetchRequest, Fetcher, HttpFetcher};

/// How a field's cell is located within a row.
enum CellLocator {
    /// 1-based position among the row's `td` cells.
    Position(usize),
    /// Arbitrary selector, first match within the row.
    Css(Selector),
}

struct FieldExtractor {
    name: String,
    kind: FieldKind,
    locator: CellLocator,
}

/// Rows and the raw "next" href found on one page.
#[derive(Debug, Default)]
struct PageOutcome {
    rows: Vec<RawRow>,
    row_elements: usize,
    next_href: Option<String>,
}

pub struct WebTableConnector {
    contract: SourceContract,
    options: WebTableOptions,
    validator: SchemaValidator,
    max_pages: usize,
    delay: Duration,
    row_selector: Selector,
    cell_selector: Selector,
    next_selector: Option<Selector>,
    fields: Vec<FieldExtractor>,
    scope: FetchScope,
}

impl WebTableConnector {
    /// Build a connector with an HTTP transport.
    pub fn new(contract: SourceContract, settings: &ConnectorSettings) -> Result<Self> {
        let fetcher = HttpFetcher::new(
            &settings.http,
            settings.timeout_for(SourceKind::WebTable),
            contract.auth.as_ref(),
        )?;
        Self::with_fetcher(contract, settings, Box::new(fetcher))
    }

    /// Build a connector over an arbitrary transport.
    pub fn with_fetcher(
        contract: SourceContract,
        settings: &ConnectorSettings,
        fetcher: Box<dyn Fetcher>,
    ) -> Result<Self> {
        let ParsingOptions::WebTable(options) = contract.parsing.clone() else {
            return Err(ContractError::Invalid {
                source_name: contract.source_name.clone(),
                message: format!("expected web_table options, got {}", contract.kind()),
            }
            .into());
        };

        let row_selector = parse_selector(&options.selector)?;
        let cell_selector = parse_selector("td")?;
        let next_selector = options
            .pagination
            .as_ref()
            .map(|p| parse_selector(&p.selector))
            .transpose()?;

        let mut fields = Vec::with_capacity(options.data_extraction.len());
        for (name, selector) in &options.data_extraction {
            let locator = match nth_child_position(selector) {
                Some(position) => CellLocator::Position(position),
                None => CellLocator::Css(parse_selector(selector)?),
            };
            fields.push(FieldExtractor {
                name: name.clone(),
                kind: options.kind_of(name),
                locator,
            });
        }

        let pagination = options.pagination.as_ref();
        let max_pages = pagination
            .and_then(|p| p.max_pages)
            .unwrap_or(settings.pagination.web_max_pages);
        let delay = Duration::from_millis(
            pagination
                .and_then(|p| p.delay_ms)
                .unwrap_or(settings.pagination.web_delay_ms),
        );

        let scope = FetchScope::new(&contract.source_name, fetcher);
        Ok(Self {
            validator: settings.validator(),
            contract,
            options,
            max_pages,
            delay,
            row_selector,
            cell_selector,
            next_selector,
            fields,
            scope,
        })
    }

    /// Parse one page. Runs synchronously so the DOM never lives across an await.
    fn parse_page(&self, html: &str) -> PageOutcome {
        let document = Html::parse_document(html);
        let mut outcome = PageOutcome::default();

        for (index, row) in document.select(&self.row_selector).enumerate() {
            outcome.row_elements += 1;
            if index == 0 && self.options.skip_header {
                continue;
            }
            let record = self.parse_row(row);
            if !record.is_empty() {
                outcome.rows.push(record);
            }
        }

        outcome.next_href = self
            .next_selector
            .as_ref()
            .and_then(|selector| document.select(selector).next())
            .and_then(|link| link.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty() && !href.starts_with('#'))
            .map(str::to_string);
        outcome
    }

    fn parse_row(&self, row: ElementRef<'_>) -> RawRow {
        let cells: Vec<ElementRef<'_>> = row.select(&self.cell_selector).collect();
        let mut record = RawRow::new();
        for field in &self.fields {
            let cell = match &field.locator {
                CellLocator::Position(n) => cells.get(n - 1).copied(),
                CellLocator::Css(selector) => row.select(selector).next(),
            };
            if let Some(cell) = cell {
                record.insert(field.name.clone(), clean_value(&cell_text(cell), field.kind));
            }
        }
        record
    }
}

#[async_trait]
impl Connector for WebTableConnector {
    fn name(&self) -> &str {
        &self.contract.source_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::WebTable
    }

    async fn extract(&mut self, params: &ExtractParams) -> Result<ExtractionResult> {
        let source = self.contract.source_name.clone();
        let mut ctx = RunContext::start(&source, SourceKind::WebTable);
        let fetcher = self.scope.get()?;
        let mut pagination = PaginationState::new(self.max_pages);
        let mut batch = RecordBatch::new();
        let mut url = params
            .url
            .clone()
            .unwrap_or_else(|| self.contract.endpoint.clone());

        loop {
            let mut request = FetchRequest::new(url.clone());
            if pagination.pages_fetched() == 0 {
                for (key, value) in &params.query {
                    request = request.with_query(key.clone(), value.clone());
                }
            }
            let response = fetcher.fetch(&request).await?;
            ctx.record_fetch(response.body.len());
            pagination.record_page(&url);
            if response.url != url {
                pagination.record_page_alias(&response.url);
            }

            let page = self.parse_page(&response.text());
            if page.row_elements == 0 {
                warn!(source = %source, url = %url, selector = %self.options.selector, "No rows matched");
            }
            info!(
                source = %source,
                page = pagination.pages_fetched(),
                rows = page.rows.len(),
                "Parsed page"
            );
            for row in page.rows {
                batch.push(row);
            }

            let Some(href) = page.next_href else {
                break;
            };
            let next = resolve_link(&response.url, &href)?;
            if pagination.check_next(&source, &next).is_some() {
                break;
            }
            courtesy_delay(self.delay).await;
            url = next;
        }

        ctx.finish(&self.contract, &self.validator, batch, MetadataExtras::default())
    }

    fn close(&mut self) {
        self.scope.close();
    }

    fn is_closed(&self) -> bool {
        self.scope.is_closed()
    }
}

fn parse_selector(selector: &str) -> std::result::Result<Selector, ParseError> {
    Selector::parse(selector).map_err(|e| ParseError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

/// `td:nth-child(N)` means the N-th `td` of the row, counted positionally.
fn nth_child_position(selector: &str) -> Option<usize> {
    selector
        .trim()
        .strip_prefix("td:nth-child(")?
        .strip_suffix(')')?
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
}

/// Text of an element with each text node trimmed and concatenated.
fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join("")
}

/// Resolve a possibly relative link against the page it was found on.
fn resolve_link(base: &str, href: &str) -> std::result::Result<String, ParseError> {
    match url::Url::parse(base) {
        Ok(base) => base
            .join(href)
            .map(String::from)
            .map_err(|e| ParseError::Selector {
                selector: href.to_string(),
                message: format!("unresolvable next-page link: {e}"),
            }),
        Err(_) => Ok(href.to_string()),
    }
}
