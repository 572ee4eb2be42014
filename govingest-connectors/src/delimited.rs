//! Delimited text (CSV/TSV) connector.

use async_trait::async_trait;
use encoding_rs::Encoding;
use govingest_core::coerce::infer_value;
use govingest_core::contract::{DelimitedOptions, ParsingOptions, SourceContract, SourceKind};
use govingest_core::error::{ContractError, ParseError, Result};
use govingest_core::hash::file_hash;
use govingest_core::record::{ExtractionResult, RawRow, RecordBatch, Value};
use govingest_core::validate::SchemaValidator;
use tracing::{debug, info};

use crate::connector::{
    Connector, ConnectorSettings, ExtractParams, FetchScope, MetadataExtras, RunContext,
};
use crate::transport::{Fetcher, HttpFetcher, Location, read_location};

pub struct DelimitedConnector {
    contract: SourceContract,
    options: DelimitedOptions,
    validator: SchemaValidator,
    scope: FetchScope,
}

impl DelimitedConnector {
    pub fn new(contract: SourceContract, settings: &ConnectorSettings) -> Result<Self> {
        let fetcher = HttpFetcher::new(
            &settings.http,
            settings.timeout_for(SourceKind::Delimited),
            contract.auth.as_ref(),
        )?;
        Self::with_fetcher(contract, settings, Box::new(fetcher))
    }

    pub fn with_fetcher(
        contract: SourceContract,
        settings: &ConnectorSettings,
        fetcher: Box<dyn Fetcher>,
    ) -> Result<Self> {
        let ParsingOptions::Delimited(options) = contract.parsing.clone() else {
            return Err(ContractError::Invalid {
                source_name: contract.source_name.clone(),
                message: format!("expected delimited options, got {}", contract.kind()),
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
}

#[async_trait]
impl Connector for DelimitedConnector {
    fn name(&self) -> &str {
        &self.contract.source_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Delimited
    }

    async fn extract(&mut self, params: &ExtractParams) -> Result<ExtractionResult> {
        let mut ctx = RunContext::start(&self.contract.source_name, SourceKind::Delimited);
        let fetcher = self.scope.get()?;
        let location = Location::parse(params.url.as_deref().unwrap_or(&self.contract.endpoint));
        let bytes = read_location(fetcher, &location).await?;
        ctx.record_fetch(bytes.len());

        let hash = file_hash(&bytes);
        debug!(source = %self.contract.source_name, location = %location, file_hash = %hash, "Read file");

        let text = decode(&bytes, &self.options.encoding)?;
        let mut batch = parse_delimited(&text, &self.options)?;
        info!(
            source = %self.contract.source_name,
            rows = batch.len(),
            columns = batch.columns().len(),
            "Parsed delimited file"
        );
        batch.rename_columns(&self.options.data_mapping);

        ctx.finish(
            &self.contract,
            &self.validator,
            batch,
            MetadataExtras {
                file_hash: Some(hash),
                ..Default::default()
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

/// Decode `bytes` with the named encoding. A byte-order mark overrides the label.
pub fn decode(bytes: &[u8], label: &str) -> std::result::Result<String, ParseError> {
    let encoding =
        Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| ParseError::Encoding {
            encoding: label.to_string(),
        })?;
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(ParseError::Encoding {
            encoding: used.name().to_string(),
        });
    }
    Ok(text.into_owned())
}

/// Parse delimited text with a header row. Values are inferred as
/// null, number, or text.
pub fn parse_delimited(
    text: &str,
    options: &DelimitedOptions,
) -> std::result::Result<RecordBatch, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter_byte())
        .quote(options.quote_byte())
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| ParseError::Delimited {
            message: e.to_string(),
        })?
        .clone();
    let columns = unique_headers(headers.iter());
    let mut batch = RecordBatch::with_columns(columns.clone());

    for record in reader.records() {
        let record = record.map_err(|e| ParseError::Delimited {
            message: e.to_string(),
        })?;
        let row: RawRow = columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let value = record.get(i).map(infer_value).unwrap_or(Value::Null);
                (column.clone(), value)
            })
            .collect();
        batch.push(row);
    }
    Ok(batch)
}

/// Header names with blanks filled in and duplicates suffixed `.1`, `.2`, ...
fn unique_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for (i, name) in raw.enumerate() {
        let base = match name.trim() {
            "" => format!("Unnamed: {i}"),
            trimmed => trimmed.to_string(),
        };
        let mut candidate = base.clone();
        let mut suffix = 1;
        while seen.contains(&candidate) {
            candidate = format!("{base}.{suffix}");
            suffix += 1;
        }
        seen.push(candidate);
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StaticFetcher;
    use govingest_core::contract::SchemaField;
    use govingest_core::error::{ConnectionError, IngestError};
    use pretty_assertions::assert_eq;

    fn contract(endpoint: &str, options: DelimitedOptions, schema: Vec<SchemaField>) -> SourceContract {
        SourceContract::new("eis_contracts", endpoint, ParsingOptions::Delimited(options), schema)
            .unwrap()
    }

    #[tokio::test]
    async fn test_local_csv_with_mapping_and_file_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contracts.csv");
        let content = "Наименование;ИНН;Сумма\nAcme;7701234567;1500,50\nGlobex;;-\n";
        std::fs::write(&path, content).unwrap();

        let mut options = DelimitedOptions {
            delimiter: ";".into(),
            ..Default::default()
        };
        options.data_mapping.insert("Наименование".into(), "name".into());
        options.data_mapping.insert("ИНН".into(), "vendor_inn".into());

        let mut connector = DelimitedConnector::with_fetcher(
            contract(path.to_str().unwrap(), options, vec![SchemaField::required("name")]),
            &ConnectorSettings::default(),
            Box::new(StaticFetcher::new()),
        )
        .unwrap();
        let result = connector.extract(&ExtractParams::default()).await.unwrap();

        assert_eq!(result.row_count(), 2);
        assert_eq!(result.rows()[0].get("name"), Some(&Value::from("Acme")));
        assert_eq!(result.rows()[0].get("Сумма"), Some(&Value::Number(1500.5)));
        assert_eq!(result.rows()[1].get("vendor_inn"), Some(&Value::Null));
        assert_eq!(
            result.metadata().file_hash.as_deref(),
            Some(file_hash(content.as_bytes()).as_str())
        );
        // 10 digits is numeric-shaped, so untyped files infer a number.
        assert_eq!(result.rows()[0].get("vendor_inn"), Some(&Value::Number(7701234567.0)));
    }

    #[tokio::test]
    async fn test_windows_1251_remote_file() {
        let (encoded, _, _) = encoding_rs::WINDOWS_1251.encode("name,city\nAcme,Москва\n");
        let url = "https://data.example.gov/export.csv";
        let fetcher = StaticFetcher::new().with_body(url, encoded.into_owned());
        let options = DelimitedOptions {
            encoding: "windows-1251".into(),
            ..Default::default()
        };
        let mut connector = DelimitedConnector::with_fetcher(
            contract(url, options, vec![]),
            &ConnectorSettings::default(),
            Box::new(fetcher),
        )
        .unwrap();
        let result = connector.extract(&ExtractParams::default()).await.unwrap();
        assert_eq!(result.rows()[0].get("city"), Some(&Value::from("Москва")));
    }

    #[tokio::test]
    async fn test_missing_file_is_connection_error() {
        let mut connector = DelimitedConnector::with_fetcher(
            contract("/nonexistent/dir/file.csv", DelimitedOptions::default(), vec![]),
            &ConnectorSettings::default(),
            Box::new(StaticFetcher::new()),
        )
        .unwrap();
        let err = connector.extract(&ExtractParams::default()).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::Connection(ConnectionError::FileRead { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_is_encoding_error() {
        let err = decode(&[0x66, 0xff, 0xfe, 0x00, 0xc3], "utf-8");
        assert!(matches!(err, Err(ParseError::Encoding { .. })));
    }

    #[test]
    fn test_quoted_fields_and_short_rows() {
        let options = DelimitedOptions::default();
        let batch = parse_delimited("a,b,c\n\"x, y\",2\n", &options).unwrap();
        assert_eq!(batch.rows()[0].get("a"), Some(&Value::from("x, y")));
        assert_eq!(batch.rows()[0].get("c"), Some(&Value::Null));
    }

    #[test]
    fn test_duplicate_and_blank_headers() {
        let headers = unique_headers(["id", "", "id", "id"].into_iter());
        assert_eq!(headers, vec!["id", "Unnamed: 1", "id.1", "id.2"]);
    }

    #[test]
    fn test_header_only_file_has_columns_but_no_rows() {
        let batch = parse_delimited("name,vendor_inn\n", &DelimitedOptions::default()).unwrap();
        assert!(batch.is_empty());
        assert!(batch.has_column("vendor_inn"));
    }
}
