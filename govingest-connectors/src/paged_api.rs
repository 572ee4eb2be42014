//! Paginated JSON API connector.
//!
//! Requests `page`/`limit` style pages until the response signals the end.
//! Item arrays are located under the usual envelope keys, and nested objects
//! are flattened into dotted column names.

use async_trait::async_trait;
use govingest_core::contract::{
    DEFAULT_PAGE_SIZE, PagedApiOptions, ParsingOptions, SourceContract, SourceKind,
};
use govingest_core::error::{ContractError, ParseError, Result};
use govingest_core::record::{ExtractionResult, RawRow, RecordBatch, Value};
use govingest_core::validate::SchemaValidator;
use serde_json::Value as Json;
use std::time::Duration;
use tracing::info;

use crate::connector::{
    Connector, ConnectorSettings, ExtractParams, FetchScope, MetadataExtras, RunContext,
    courtesy_delay,
};
use crate::pagination::PaginationState;
use crate::transport::{FetchRequest, Fetcher, HttpFetcher};

/// Envelope keys searched, in order, for the item array.
const ITEM_KEYS: [&str; 3] = ["items", "data", "results"];

/// Column used when an item is a bare scalar rather than an object.
const SCALAR_COLUMN: &str = "value";

pub struct PagedApiConnector {
    contract: SourceContract,
    options: PagedApiOptions,
    validator: SchemaValidator,
    max_pages: usize,
    delay: Duration,
    scope: FetchScope,
}

impl PagedApiConnector {
    pub fn new(contract: SourceContract, settings: &ConnectorSettings) -> Result<Self> {
        let fetcher = HttpFetcher::new(
            &settings.http,
            settings.timeout_for(SourceKind::PagedApi),
            contract.auth.as_ref(),
        )?;
        Self::with_fetcher(contract, settings, Box::new(fetcher))
    }

    pub fn with_fetcher(
        contract: SourceContract,
        settings: &ConnectorSettings,
        fetcher: Box<dyn Fetcher>,
    ) -> Result<Self> {
        let ParsingOptions::PagedApi(options) = contract.parsing.clone() else {
            return Err(ContractError::Invalid {
                source_name: contract.source_name.clone(),
                message: format!("expected paged_api options, got {}", contract.kind()),
            }
            .into());
        };
        let max_pages = options.max_pages.unwrap_or(settings.pagination.api_max_pages);
        let delay =
            Duration::from_millis(options.delay_ms.unwrap_or(settings.pagination.api_delay_ms));
        let scope = FetchScope::new(&contract.source_name, fetcher);
        Ok(Self {
            validator: settings.validator(),
            contract,
            options,
            max_pages,
            delay,
            scope,
        })
    }

    /// Page size: call parameter, then contract, then the default.
    fn page_size(&self, params: &ExtractParams) -> usize {
        params
            .query
            .get(&self.options.size_param)
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .or(self.options.page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    fn start_page(&self, params: &ExtractParams) -> u64 {
        params
            .query
            .get(&self.options.page_param)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(self.options.start_page)
    }

    fn request(&self, url: &str, params: &ExtractParams, page: u64, size: usize) -> FetchRequest {
        let mut request = FetchRequest::new(url);
        for (key, value) in &params.query {
            if key != &self.options.page_param && key != &self.options.size_param {
                request = request.with_query(key.clone(), value.clone());
            }
        }
        request
            .with_query(self.options.page_param.clone(), page.to_string())
            .with_query(self.options.size_param.clone(), size.to_string())
    }
}

#[async_trait]
impl Connector for PagedApiConnector {
    fn name(&self) -> &str {
        &self.contract.source_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::PagedApi
    }

    async fn extract(&mut self, params: &ExtractParams) -> Result<ExtractionResult> {
        let source = self.contract.source_name.clone();
        let mut ctx = RunContext::start(&source, SourceKind::PagedApi);
        let fetcher = self.scope.get()?;
        let url = params
            .url
            .clone()
            .unwrap_or_else(|| self.contract.endpoint.clone());
        let page_size = self.page_size(params);
        let mut page = self.start_page(params);
        let mut pagination = PaginationState::new(self.max_pages);
        let mut batch = RecordBatch::new();

        loop {
            let request = self.request(&url, params, page, page_size);
            let response = fetcher.fetch(&request).await?;
            ctx.record_fetch(response.body.len());
            pagination.record_page(&request.display_url());

            let payload: Json =
                serde_json::from_slice(&response.body).map_err(|e| ParseError::Json {
                    message: format!("{}: {e}", request.display_url()),
                })?;
            let items = extract_items(&payload);
            info!(source = %source, page, items = items.len(), "Fetched API page");
            if items.is_empty() {
                break;
            }
            let item_count = items.len();
            for item in items {
                batch.push(flatten_item(item));
            }

            if !has_next_page(&payload, item_count, page_size) {
                break;
            }
            if pagination.check_limit(&source).is_some() {
                break;
            }
            courtesy_delay(self.delay).await;
            page += 1;
        }

        batch.rename_columns(&self.options.data_mapping);
        ctx.finish(&self.contract, &self.validator, batch, MetadataExtras::default())
    }

    fn close(&mut self) {
        self.scope.close();
    }

    fn is_closed(&self) -> bool {
        self.scope.is_closed()
    }
}

/// Locate the item list of a page.
///
/// A top-level array is the list itself. Otherwise the first present envelope
/// key wins; an object there is a single item. A bare object with none of the
/// keys is treated as one item.
pub fn extract_items(payload: &Json) -> Vec<&Json> {
    match payload {
        Json::Array(items) => items.iter().collect(),
        Json::Object(map) => {
            for key in ITEM_KEYS {
                if let Some(found) = map.get(key) {
                    return match found {
                        Json::Array(items) => items.iter().collect(),
                        Json::Null => Vec::new(),
                        other => vec![other],
                    };
                }
            }
            vec![payload]
        }
        Json::Null => Vec::new(),
        other => vec![other],
    }
}

/// Decide whether another page follows.
///
/// Checked in order: a `next_page` field (non-null means more), a `has_next`
/// flag, a `pagination` block with `current_page` / `total_pages`, and finally
/// a full page of items.
pub fn has_next_page(payload: &Json, item_count: usize, page_size: usize) -> bool {
    if let Json::Object(map) = payload {
        if let Some(next) = map.get("next_page") {
            return !next.is_null();
        }
        if let Some(flag) = map.get("has_next") {
            return json_truthy(flag);
        }
        if let Some(block) = map.get("pagination") {
            let current = block.get("current_page").and_then(json_number).unwrap_or(0.0);
            let total = block.get("total_pages").and_then(json_number).unwrap_or(0.0);
            return current < total;
        }
    }
    item_count >= page_size
}

fn json_number(value: &Json) -> Option<f64> {
    match value {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_truthy(value: &Json) -> bool {
    match value {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Json::String(s) => !s.is_empty(),
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}

/// Flatten one item into a row; nested objects become `parent.child` columns.
pub fn flatten_item(item: &Json) -> RawRow {
    let mut row = RawRow::new();
    match item {
        Json::Object(map) => {
            for (key, value) in map {
                flatten_into(&mut row, key, value);
            }
        }
        other => {
            row.insert(SCALAR_COLUMN.to_string(), Value::from_json(other));
        }
    }
    row
}

fn flatten_into(row: &mut RawRow, prefix: &str, value: &Json) {
    match value {
        Json::Object(map) if !map.is_empty() => {
            for (key, nested) in map {
                flatten_into(row, &format!("{prefix}.{key}"), nested);
            }
        }
        other => {
            row.insert(prefix.to_string(), Value::from_json(other));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StaticFetcher;
    use govingest_core::contract::SchemaField;
    use govingest_core::error::IngestError;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    const API: &str = "https://api.example.gov/v1/indicators";

    fn settings() -> ConnectorSettings {
        let mut settings = ConnectorSettings::default();
        settings.pagination.api_delay_ms = 0;
        settings
    }

    fn contract(page_size: Option<usize>, schema: Vec<SchemaField>) -> SourceContract {
        let options = PagedApiOptions {
            page_size,
            ..Default::default()
        };
        SourceContract::new("fedstat", API, ParsingOptions::PagedApi(options), schema).unwrap()
    }

    fn page_url(page: u64, limit: usize) -> String {
        format!("{API}?page={page}&limit={limit}")
    }

    #[tokio::test]
    async fn test_has_next_false_stops_after_first_page() {
        let fetcher = Arc::new(StaticFetcher::new().with_json(
            page_url(1, 1000),
            &json!({"items": [{"id": 1}, {"id": 2}], "has_next": false}),
        ));
        let mut connector =
            PagedApiConnector::with_fetcher(contract(None, vec![]), &settings(), Box::new(fetcher.clone()))
                .unwrap();

        let result = connector.extract(&ExtractParams::default()).await.unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_full_pages_continue_until_short_page() {
        let fetcher = Arc::new(
            StaticFetcher::new()
                .with_json(page_url(1, 2), &json!([{"id": 1}, {"id": 2}]))
                .with_json(page_url(2, 2), &json!([{"id": 3}, {"id": 4}]))
                .with_json(page_url(3, 2), &json!([{"id": 5}])),
        );
        let mut connector = PagedApiConnector::with_fetcher(
            contract(Some(2), vec![SchemaField::required("id")]),
            &settings(),
            Box::new(fetcher.clone()),
        )
        .unwrap();

        let result = connector.extract(&ExtractParams::default()).await.unwrap();
        assert_eq!(result.row_count(), 5);
        assert_eq!(
            fetcher.requested_urls(),
            vec![page_url(1, 2), page_url(2, 2), page_url(3, 2)]
        );
    }

    #[tokio::test]
    async fn test_empty_page_ends_pagination() {
        let fetcher = StaticFetcher::new()
            .with_json(page_url(1, 1), &json!({"data": [{"id": 1}], "next_page": 2}))
            .with_json(page_url(2, 1), &json!({"data": []}));
        let mut connector =
            PagedApiConnector::with_fetcher(contract(Some(1), vec![]), &settings(), Box::new(fetcher))
                .unwrap();
        let result = connector.extract(&ExtractParams::default()).await.unwrap();
        assert_eq!(result.row_count(), 1);
    }

    #[tokio::test]
    async fn test_page_limit_bounds_endless_api() {
        let mut fetcher = StaticFetcher::new();
        for page in 1..=5 {
            fetcher = fetcher.with_json(
                page_url(page, 1),
                &json!({"results": [{"id": page}], "has_next": true}),
            );
        }
        let options = PagedApiOptions {
            page_size: Some(1),
            max_pages: Some(3),
            ..Default::default()
        };
        let contract =
            SourceContract::new("fedstat", API, ParsingOptions::PagedApi(options), vec![]).unwrap();
        let mut connector =
            PagedApiConnector::with_fetcher(contract, &settings(), Box::new(fetcher)).unwrap();
        let result = connector.extract(&ExtractParams::default()).await.unwrap();
        assert_eq!(result.row_count(), 3);
        assert_eq!(result.stats().pages_fetched, 3);
    }

    #[tokio::test]
    async fn test_nested_objects_flatten_and_rename() {
        let fetcher = StaticFetcher::new().with_json(
            page_url(1, 1000),
            &json!({"items": [{"id": 7, "region": {"code": "77", "name": "Москва"}, "tags": ["a"]}]}),
        );
        let mut options = PagedApiOptions::default();
        options
            .data_mapping
            .insert("region.code".into(), "region_code".into());
        let contract =
            SourceContract::new("fedstat", API, ParsingOptions::PagedApi(options), vec![]).unwrap();
        let mut connector =
            PagedApiConnector::with_fetcher(contract, &settings(), Box::new(fetcher)).unwrap();

        let result = connector.extract(&ExtractParams::default()).await.unwrap();
        let row = &result.rows()[0];
        assert_eq!(row.get("region_code"), Some(&Value::from("77")));
        assert_eq!(row.get("region.name"), Some(&Value::from("Москва")));
        assert_eq!(row.get("tags"), Some(&Value::from("[\"a\"]")));
        assert_eq!(row.get("id"), Some(&Value::Number(7.0)));
    }

    #[tokio::test]
    async fn test_extra_query_params_forwarded() {
        let fetcher = Arc::new(StaticFetcher::new().with_json(
            format!("{API}?region=77&page=1&limit=10"),
            &json!([{"id": 1}]),
        ));
        let mut connector = PagedApiConnector::with_fetcher(
            contract(None, vec![]),
            &settings(),
            Box::new(fetcher.clone()),
        )
        .unwrap();
        let params = ExtractParams::new()
            .with_query("region", "77")
            .with_query("limit", "10");
        let result = connector.extract(&params).await.unwrap();
        assert_eq!(result.row_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_error() {
        let fetcher =
            StaticFetcher::new().with_typed_body(page_url(1, 1000), "application/json", "{oops");
        let mut connector =
            PagedApiConnector::with_fetcher(contract(None, vec![]), &settings(), Box::new(fetcher))
                .unwrap();
        let err = connector.extract(&ExtractParams::default()).await.unwrap_err();
        assert!(matches!(err, IngestError::Parse(ParseError::Json { .. })));
    }

    #[test]
    fn test_has_next_page_signals() {
        assert!(has_next_page(&json!({"next_page": "/p/2"}), 0, 10));
        assert!(!has_next_page(&json!({"next_page": null}), 10, 10));
        assert!(has_next_page(&json!({"next_page": 0}), 1, 10));
        assert!(has_next_page(&json!({"next_page": ""}), 1, 10));
        assert!(!has_next_page(&json!({"has_next": false}), 10, 10));
        assert!(has_next_page(
            &json!({"pagination": {"current_page": 1, "total_pages": 3}}),
            1,
            10
        ));
        assert!(!has_next_page(
            &json!({"pagination": {"current_page": 3, "total_pages": 3}}),
            10,
            10
        ));
        assert!(has_next_page(&json!([]), 1000, 1000));
        assert!(!has_next_page(&json!([]), 999, 1000));
    }

    #[test]
    fn test_extract_items_envelopes() {
        assert_eq!(extract_items(&json!({"results": [1, 2, 3]})).len(), 3);
        assert_eq!(extract_items(&json!({"data": {"id": 1}})).len(), 1);
        assert_eq!(extract_items(&json!({"items": null})).len(), 0);
        assert_eq!(extract_items(&json!({"list": [1, 2, 3], "total": 3})).len(), 1);
        assert_eq!(extract_items(&json!({"id": 1})).len(), 1);
    }
}
