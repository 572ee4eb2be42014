//! # govingest Connectors
//!
//! Format adapters for govingest. Each adapter implements [`Connector`] and
//! turns one source contract into an [`ExtractionResult`](govingest_core::ExtractionResult):
//! HTML tables, paginated JSON APIs, delimited files, spreadsheets, and
//! PDF/DOCX documents.

pub mod connector;
pub mod delimited;
pub mod document;
pub mod factory;
pub mod paged_api;
pub mod pagination;
pub mod spreadsheet;
pub mod transport;
pub mod web_table;

pub use connector::{
    Connector, ConnectorSettings, ExtractParams, extract_all_and_close, extract_and_close,
};
pub use delimited::DelimitedConnector;
pub use document::DocumentConnector;
pub use factory::ConnectorFactory;
pub use paged_api::PagedApiConnector;
pub use spreadsheet::SpreadsheetConnector;
pub use transport::{FetchRequest, FetchResponse, Fetcher, HttpFetcher, StaticFetcher};
pub use web_table::WebTableConnector;
