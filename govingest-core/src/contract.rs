//! Source contracts: declarative descriptions of one data source.
//!
//! A contract is a YAML document naming the source, its endpoint, the
//! format-specific parsing options, the expected schema, and optional
//! pre-resolved credentials. Contracts are parsed into typed options per
//! source type and validated once, at load time.
//!
//! ```yaml
//! source_name: reestr_po
//! type: web_table
//! endpoint: https://reestr.digital.gov.ru/reestr/
//! parsing:
//!   selector: "table.solutions-table tr"
//!   data_extraction:
//!     name: "td:nth-child(1)"
//!     vendor_inn: "td:nth-child(2)"
//!   pagination:
//!     type: next_page_link
//!     selector: "a.next-page"
//! schema:
//!   - name: name
//!     required: true
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::coerce::FieldKind;
use crate::error::ContractError;

/// Default row selector for web tables.
pub const DEFAULT_ROW_SELECTOR: &str = "table tr";
/// Default "next page" link selector.
pub const DEFAULT_NEXT_SELECTOR: &str = "a.next-page";
/// Default page size for paged APIs.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// The declared source type, used by the connector factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    WebTable,
    PagedApi,
    Delimited,
    Spreadsheet,
    Document,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::WebTable,
        SourceKind::PagedApi,
        SourceKind::Delimited,
        SourceKind::Spreadsheet,
        SourceKind::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::WebTable => "web_table",
            SourceKind::PagedApi => "paged_api",
            SourceKind::Delimited => "delimited",
            SourceKind::Spreadsheet => "spreadsheet",
            SourceKind::Document => "document",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared column. Used for presence and null checks only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(default)]
    pub required: bool,
}

impl SchemaField {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// Pre-resolved credentials. Injected once when the connector is built.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// `Authorization: Bearer <token>`.
    Bearer { token: String },
    /// `<header>: <key>`.
    ApiKey { header: String, key: String },
}

impl AuthConfig {
    /// The header name and value this credential adds to every request.
    pub fn header(&self) -> (String, String) {
        match self {
            AuthConfig::Bearer { token } => ("Authorization".into(), format!("Bearer {token}")),
            AuthConfig::ApiKey { header, key } => (header.clone(), key.clone()),
        }
    }
}

// Credentials stay out of logs and debug dumps.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthConfig::Bearer { .. } => f.debug_struct("Bearer").field("token", &"***").finish(),
            AuthConfig::ApiKey { header, .. } => f
                .debug_struct("ApiKey")
                .field("header", header)
                .field("key", &"***")
                .finish(),
        }
    }
}

/// How a web table finds its next page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationKind {
    #[default]
    NextPageLink,
}

/// Pagination block for web tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebPagination {
    #[serde(rename = "type", default)]
    pub kind: PaginationKind,
    #[serde(default = "default_next_selector")]
    pub selector: String,
    /// Upper bound on pages followed; falls back to the runtime config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<usize>,
    /// Delay between page requests; falls back to the runtime config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl Default for WebPagination {
    fn default() -> Self {
        Self {
            kind: PaginationKind::NextPageLink,
            selector: default_next_selector(),
            max_pages: None,
            delay_ms: None,
        }
    }
}

/// Parsing options for tabular web pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebTableOptions {
    #[serde(default = "default_row_selector")]
    pub selector: String,
    #[serde(default = "default_true")]
    pub skip_header: bool,
    /// Field name to cell selector. `td:nth-child(N)` selects the N-th cell
    /// positionally; anything else is a CSS selector relative to the row.
    #[serde(default)]
    pub data_extraction: BTreeMap<String, String>,
    /// Explicit field kinds; fields not listed are inferred from their name.
    #[serde(default)]
    pub field_types: BTreeMap<String, FieldKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<WebPagination>,
}

impl Default for WebTableOptions {
    fn default() -> Self {
        Self {
            selector: default_row_selector(),
            skip_header: true,
            data_extraction: BTreeMap::new(),
            field_types: BTreeMap::new(),
            pagination: None,
        }
    }
}

impl WebTableOptions {
    /// The coercion kind for `field`.
    pub fn kind_of(&self, field: &str) -> FieldKind {
        self.field_types
            .get(field)
            .copied()
            .unwrap_or_else(|| FieldKind::infer(field))
    }
}

/// Parsing options for paginated JSON APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedApiOptions {
    #[serde(default = "default_page_param")]
    pub page_param: String,
    #[serde(default = "default_size_param")]
    pub size_param: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
    #[serde(default = "default_start_page")]
    pub start_page: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub data_mapping: BTreeMap<String, String>,
}

impl Default for PagedApiOptions {
    fn default() -> Self {
        Self {
            page_param: default_page_param(),
            size_param: default_size_param(),
            page_size: None,
            start_page: default_start_page(),
            max_pages: None,
            delay_ms: None,
            data_mapping: BTreeMap::new(),
        }
    }
}

/// Parsing options for delimited text files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelimitedOptions {
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_quote_char")]
    pub quote_char: String,
    #[serde(default)]
    pub data_mapping: BTreeMap<String, String>,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
            delimiter: default_delimiter(),
            quote_char: default_quote_char(),
            data_mapping: BTreeMap::new(),
        }
    }
}

impl DelimitedOptions {
    pub fn delimiter_byte(&self) -> u8 {
        single_byte(&self.delimiter).unwrap_or(b',')
    }

    pub fn quote_byte(&self) -> u8 {
        single_byte(&self.quote_char).unwrap_or(b'"')
    }
}

/// Sheet selection: zero-based index or sheet name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SheetSelector {
    Index(usize),
    Name(String),
}

impl Default for SheetSelector {
    fn default() -> Self {
        SheetSelector::Index(0)
    }
}

impl std::fmt::Display for SheetSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SheetSelector::Index(i) => write!(f, "#{i}"),
            SheetSelector::Name(name) => f.write_str(name),
        }
    }
}

/// Parsing options for spreadsheets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadsheetOptions {
    #[serde(default)]
    pub sheet_name: SheetSelector,
    #[serde(default)]
    pub header_row: usize,
    #[serde(default)]
    pub data_mapping: BTreeMap<String, String>,
}

/// A text extraction rule applied when a document has no tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub pattern: String,
    pub field: String,
    /// chrono format for date-like fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Parsing options for PDF / DOCX documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOptions {
    #[serde(default)]
    pub extraction_rules: Vec<ExtractionRule>,
    /// Overrides detection from the endpoint extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

/// Typed parsing options, one variant per source type.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsingOptions {
    WebTable(WebTableOptions),
    PagedApi(PagedApiOptions),
    Delimited(DelimitedOptions),
    Spreadsheet(SpreadsheetOptions),
    Document(DocumentOptions),
}

impl ParsingOptions {
    pub fn kind(&self) -> SourceKind {
        match self {
            ParsingOptions::WebTable(_) => SourceKind::WebTable,
            ParsingOptions::PagedApi(_) => SourceKind::PagedApi,
            ParsingOptions::Delimited(_) => SourceKind::Delimited,
            ParsingOptions::Spreadsheet(_) => SourceKind::Spreadsheet,
            ParsingOptions::Document(_) => SourceKind::Document,
        }
    }
}

/// On-disk shape; `parsing` is interpreted according to `type`.
#[derive(Debug, Deserialize)]
struct RawContract {
    source_name: String,
    #[serde(rename = "type")]
    kind: SourceKind,
    endpoint: String,
    #[serde(default)]
    parsing: serde_yaml::Value,
    #[serde(default)]
    schema: Vec<SchemaField>,
    #[serde(default)]
    auth: Option<AuthConfig>,
}

/// A validated source contract. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceContract {
    pub source_name: String,
    pub endpoint: String,
    pub parsing: ParsingOptions,
    pub schema: Vec<SchemaField>,
    pub auth: Option<AuthConfig>,
}

impl SourceContract {
    /// Build a contract in code and validate it.
    pub fn new(
        source_name: impl Into<String>,
        endpoint: impl Into<String>,
        parsing: ParsingOptions,
        schema: Vec<SchemaField>,
    ) -> Result<Self, ContractError> {
        let contract = Self {
            source_name: source_name.into(),
            endpoint: endpoint.into(),
            parsing,
            schema,
            auth: None,
        };
        contract.validate()?;
        Ok(contract)
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn kind(&self) -> SourceKind {
        self.parsing.kind()
    }

    /// Parse and validate a contract from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ContractError> {
        let raw: RawContract = serde_yaml::from_str(yaml).map_err(|e| ContractError::Yaml {
            message: e.to_string(),
        })?;
        Self::try_from(raw)
    }

    /// Load and validate a contract file.
    pub fn load(path: &Path) -> Result<Self, ContractError> {
        if !path.exists() {
            return Err(ContractError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|e| ContractError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&text)
    }

    /// Names of the schema fields marked as required.
    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.schema
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
    }

    fn invalid(&self, message: impl Into<String>) -> ContractError {
        ContractError::Invalid {
            source_name: self.source_name.clone(),
            message: message.into(),
        }
    }

    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.source_name.trim().is_empty() {
            return Err(self.invalid("source_name is empty"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(self.invalid("endpoint is empty"));
        }
        for field in &self.schema {
            if field.name.trim().is_empty() {
                return Err(self.invalid("schema contains a field with an empty name"));
            }
        }
        if let Some(AuthConfig::ApiKey { header, .. }) = &self.auth {
            if header.trim().is_empty() {
                return Err(self.invalid("auth.header is empty"));
            }
        }

        match &self.parsing {
            ParsingOptions::WebTable(opts) => {
                check_selector(&opts.selector).map_err(|m| self.invalid(m))?;
                if opts.data_extraction.is_empty() {
                    return Err(self.invalid("parsing.data_extraction declares no fields"));
                }
                for selector in opts.data_extraction.values() {
                    check_selector(selector).map_err(|m| self.invalid(m))?;
                }
                if let Some(pagination) = &opts.pagination {
                    check_selector(&pagination.selector).map_err(|m| self.invalid(m))?;
                    if pagination.max_pages == Some(0) {
                        return Err(self.invalid("pagination.max_pages must be at least 1"));
                    }
                }
            }
            ParsingOptions::PagedApi(opts) => {
                if opts.page_size == Some(0) {
                    return Err(self.invalid("parsing.page_size must be at least 1"));
                }
                if opts.max_pages == Some(0) {
                    return Err(self.invalid("parsing.max_pages must be at least 1"));
                }
                if opts.page_param.is_empty() || opts.size_param.is_empty() {
                    return Err(self.invalid("page_param and size_param must not be empty"));
                }
            }
            ParsingOptions::Delimited(opts) => {
                if single_byte(&opts.delimiter).is_none() {
                    return Err(self.invalid(format!(
                        "delimiter must be a single byte, got {:?}",
                        opts.delimiter
                    )));
                }
                if single_byte(&opts.quote_char).is_none() {
                    return Err(self.invalid(format!(
                        "quote_char must be a single byte, got {:?}",
                        opts.quote_char
                    )));
                }
                if encoding_rs::Encoding::for_label(opts.encoding.as_bytes()).is_none() {
                    return Err(self.invalid(format!("unknown encoding '{}'", opts.encoding)));
                }
            }
            ParsingOptions::Spreadsheet(_) => {}
            ParsingOptions::Document(opts) => {
                for rule in &opts.extraction_rules {
                    if rule.field.trim().is_empty() {
                        return Err(self.invalid("extraction rule has an empty field"));
                    }
                    regex::RegexBuilder::new(&rule.pattern)
                        .case_insensitive(true)
                        .multi_line(true)
                        .build()
                        .map_err(|e| {
                            self.invalid(format!("invalid pattern for '{}': {e}", rule.field))
                        })?;
                }
            }
        }
        Ok(())
    }
}

impl TryFrom<RawContract> for SourceContract {
    type Error = ContractError;

    fn try_from(raw: RawContract) -> Result<Self, Self::Error> {
        let source_name = raw.source_name;
        let parsing = parse_options(raw.kind, raw.parsing).map_err(|e| ContractError::Invalid {
            source_name: source_name.clone(),
            message: format!("parsing options for {}: {e}", raw.kind),
        })?;
        let contract = SourceContract {
            source_name,
            endpoint: raw.endpoint,
            parsing,
            schema: raw.schema,
            auth: raw.auth,
        };
        contract.validate()?;
        Ok(contract)
    }
}

fn parse_options(
    kind: SourceKind,
    value: serde_yaml::Value,
) -> Result<ParsingOptions, serde_yaml::Error> {
    fn typed<T: serde::de::DeserializeOwned + Default>(
        value: serde_yaml::Value,
    ) -> Result<T, serde_yaml::Error> {
        if value.is_null() {
            Ok(T::default())
        } else {
            serde_yaml::from_value(value)
        }
    }

    Ok(match kind {
        SourceKind::WebTable => ParsingOptions::WebTable(typed(value)?),
        SourceKind::PagedApi => ParsingOptions::PagedApi(typed(value)?),
        SourceKind::Delimited => ParsingOptions::Delimited(typed(value)?),
        SourceKind::Spreadsheet => ParsingOptions::Spreadsheet(typed(value)?),
        SourceKind::Document => ParsingOptions::Document(typed(value)?),
    })
}

fn check_selector(selector: &str) -> Result<(), String> {
    scraper::Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| format!("invalid selector '{selector}': {e}"))
}

fn single_byte(s: &str) -> Option<u8> {
    match s.as_bytes() {
        [b] => Some(*b),
        _ if s == "\\t" => Some(b'\t'),
        _ => None,
    }
}

/// List contract files (`*.yaml`, `*.yml`) in a directory, sorted by name.
pub fn discover_contracts(dir: &Path) -> Result<Vec<PathBuf>, ContractError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ContractError::Io {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Resolve a contract argument: an existing path, or a source name looked up
/// as `<dir>/<name>.yaml` / `<dir>/<name>.yml`.
pub fn resolve_contract_path(dir: &Path, name_or_path: &str) -> PathBuf {
    let direct = PathBuf::from(name_or_path);
    if direct.is_file() {
        return direct;
    }
    let yml = dir.join(format!("{name_or_path}.yml"));
    if yml.is_file() {
        return yml;
    }
    dir.join(format!("{name_or_path}.yaml"))
}

fn default_row_selector() -> String {
    DEFAULT_ROW_SELECTOR.into()
}

fn default_next_selector() -> String {
    DEFAULT_NEXT_SELECTOR.into()
}

fn default_true() -> bool {
    true
}

fn default_page_param() -> String {
    "page".into()
}

fn default_size_param() -> String {
    "limit".into()
}

fn default_start_page() -> u64 {
    1
}

fn default_encoding() -> String {
    "utf-8".into()
}

fn default_delimiter() -> String {
    ",".into()
}

fn default_quote_char() -> String {
    "\"".into()
}
