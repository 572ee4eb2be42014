//! Connector factory: maps a contract's source type to an adapter.
//!
//! Builders are registered per [`SourceKind`] at startup. The default set
//! covers every built-in format; callers may swap a builder (for example to
//! inject a recording transport in tests).

use govingest_core::config::IngestConfig;
use govingest_core::contract::{SourceContract, SourceKind};
use govingest_core::error::{ContractError, Result};
use std::collections::HashMap;
use tracing::debug;

use crate::connector::{Connector, ConnectorSettings};
use crate::delimited::DelimitedConnector;
use crate::document::DocumentConnector;
use crate::paged_api::PagedApiConnector;
use crate::spreadsheet::SpreadsheetConnector;
use crate::transport::Fetcher;
use crate::web_table::WebTableConnector;

/// Builds a connector from a contract, optionally over a provided transport.
pub type ConnectorBuilder = fn(
    SourceContract,
    &ConnectorSettings,
    Option<Box<dyn Fetcher>>,
) -> Result<Box<dyn Connector>>;

pub struct ConnectorFactory {
    settings: ConnectorSettings,
    builders: HashMap<SourceKind, ConnectorBuilder>,
}

impl ConnectorFactory {
    /// A factory with no builders registered.
    pub fn empty(settings: ConnectorSettings) -> Self {
        Self {
            settings,
            builders: HashMap::new(),
        }
    }

    /// A factory with every built-in adapter registered.
    pub fn new(config: &IngestConfig) -> Self {
        Self::with_settings(ConnectorSettings::from(config))
    }

    pub fn with_settings(settings: ConnectorSettings) -> Self {
        let mut factory = Self::empty(settings);
        factory.register(SourceKind::WebTable, build_web_table);
        factory.register(SourceKind::PagedApi, build_paged_api);
        factory.register(SourceKind::Delimited, build_delimited);
        factory.register(SourceKind::Spreadsheet, build_spreadsheet);
        factory.register(SourceKind::Document, build_document);
        factory
    }

    /// Register or replace the builder for `kind`.
    pub fn register(&mut self, kind: SourceKind, builder: ConnectorBuilder) {
        debug!(kind = %kind, "Registering connector");
        self.builders.insert(kind, builder);
    }

    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    /// Source types with a registered builder, in declaration order.
    pub fn supported_kinds(&self) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|kind| self.builders.contains_key(kind))
            .collect()
    }

    /// Build the connector for `contract` with an HTTP transport.
    pub fn build(&self, contract: SourceContract) -> Result<Box<dyn Connector>> {
        self.build_inner(contract, None)
    }

    /// Build the connector for `contract` over the given transport.
    pub fn build_with_fetcher(
        &self,
        contract: SourceContract,
        fetcher: Box<dyn Fetcher>,
    ) -> Result<Box<dyn Connector>> {
        self.build_inner(contract, Some(fetcher))
    }

    fn build_inner(
        &self,
        contract: SourceContract,
        fetcher: Option<Box<dyn Fetcher>>,
    ) -> Result<Box<dyn Connector>> {
        let kind = contract.kind();
        let builder = self.builders.get(&kind).ok_or_else(|| ContractError::Invalid {
            source_name: contract.source_name.clone(),
            message: format!("no connector registered for type '{kind}'"),
        })?;
        builder(contract, &self.settings, fetcher)
    }
}

fn build_web_table(
    contract: SourceContract,
    settings: &ConnectorSettings,
    fetcher: Option<Box<dyn Fetcher>>,
) -> Result<Box<dyn Connector>> {
    Ok(match fetcher {
        Some(f) => Box::new(WebTableConnector::with_fetcher(contract, settings, f)?),
        None => Box::new(WebTableConnector::new(contract, settings)?),
    })
}

fn build_paged_api(
    contract: SourceContract,
    settings: &ConnectorSettings,
    fetcher: Option<Box<dyn Fetcher>>,
) -> Result<Box<dyn Connector>> {
    Ok(match fetcher {
        Some(f) => Box::new(PagedApiConnector::with_fetcher(contract, settings, f)?),
        None => Box::new(PagedApiConnector::new(contract, settings)?),
    })
}

fn build_delimited(
    contract: SourceContract,
    settings: &ConnectorSettings,
    fetcher: Option<Box<dyn Fetcher>>,
) -> Result<Box<dyn Connector>> {
    Ok(match fetcher {
        Some(f) => Box::new(DelimitedConnector::with_fetcher(contract, settings, f)?),
        None => Box::new(DelimitedConnector::new(contract, settings)?),
    })
}

fn build_spreadsheet(
    contract: SourceContract,
    settings: &ConnectorSettings,
    fetcher: Option<Box<dyn Fetcher>>,
) -> Result<Box<dyn Connector>> {
    Ok(match fetcher {
        Some(f) => Box::new(SpreadsheetConnector::with_fetcher(contract, settings, f)?),
        None => Box::new(SpreadsheetConnector::new(contract, settings)?),
    })
}

fn build_document(
    contract: SourceContract,
    settings: &ConnectorSettings,
    fetcher: Option<Box<dyn Fetcher>>,
) -> Result<Box<dyn Connector>> {
    Ok(match fetcher {
        Some(f) => Box::new(DocumentConnector::with_fetcher(contract, settings, f)?),
        None => Box::new(DocumentConnector::new(contract, settings)?),
    })
}
