//! # govingest Core
//!
//! Core library for govingest, the extraction framework for government data feeds.
//! Provides source contracts, the raw record model, cell coercion, schema
//! validation, change detection, the raw-layer sink, configuration, and errors.

pub mod coerce;
pub mod config;
pub mod contract;
pub mod error;
pub mod hash;
pub mod record;
pub mod sink;
pub mod validate;

// Re-export commonly used types at the crate root.
pub use coerce::FieldKind;
pub use config::{IngestConfig, load_config};
pub use contract::{
    AuthConfig, DelimitedOptions, DocumentOptions, ExtractionRule, PagedApiOptions,
    ParsingOptions, SchemaField, SheetSelector, SourceContract, SourceKind, SpreadsheetOptions,
    WebPagination, WebTableOptions,
};
pub use error::{
    ConnectionError, ContractError, IngestError, ParseError, Result, SchemaError,
};
pub use hash::{ChangeDetector, ChangeStatus, FileHashLedger, HashLedger, InMemoryHashLedger};
pub use record::{
    ExtractionMetadata, ExtractionResult, NullWarning, RawRow, RecordBatch, RunStats, Value,
};
pub use sink::{JsonlSink, RawSink};
pub use validate::{SchemaValidator, ValidationReport};
