//! Error types for the govingest core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering transport, parsing, schema validation, and contract loading.
//! Per-cell coercion problems are never errors: they resolve to
//! [`Value::Null`](crate::record::Value::Null).

use std::path::PathBuf;

/// Top-level error type for an extraction run.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    /// Short, stable label for the error family, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Connection(_) => "connection",
            IngestError::Parse(_) => "parse",
            IngestError::Schema(_) => "schema",
            IngestError::Contract(_) => "contract",
            IngestError::Io(_) => "io",
            IngestError::Serialization(_) => "serialization",
        }
    }
}

/// Network, timeout, HTTP status, and file access failures.
///
/// Surfaced to the caller as-is; connectors never retry internally.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to read {path}: {message}")]
    FileRead { path: PathBuf, message: String },

    #[error("Connector for source '{source_name}' is closed")]
    Closed { source_name: String },

    #[error("Failed to build HTTP client: {message}")]
    ClientBuild { message: String },
}

/// Malformed payloads and unsupported formats.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    #[error("Malformed JSON payload: {message}")]
    Json { message: String },

    #[error("Malformed delimited file: {message}")]
    Delimited { message: String },

    #[error("Cannot decode payload as {encoding}")]
    Encoding { encoding: String },

    #[error("Spreadsheet error: {message}")]
    Spreadsheet { message: String },

    #[error("Document error: {message}")]
    Document { message: String },

    #[error("Unsupported file type: {file_type}")]
    UnsupportedFileType { file_type: String },

    #[error("Sheet not found: {sheet}")]
    SheetNotFound { sheet: String },
}

/// Required-field violations. Always fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Required field '{field}' not found in data from '{source_name}'")]
    MissingRequiredField { source_name: String, field: String },
}

/// Errors raised while loading or validating a source contract.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("Contract file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read contract {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Contract YAML error: {message}")]
    Yaml { message: String },

    #[error("Invalid contract '{source_name}': {message}")]
    Invalid { source_name: String, message: String },
}

/// A type alias for results using the top-level `IngestError`.
pub type Result<T> = std::result::Result<T, IngestError>;
