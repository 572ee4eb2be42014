//! One ingest run: build the connector, extract, close, compare with the
//! hash ledger, persist.

use futures::stream::{self, StreamExt};
use govingest_connectors::transport::Location;
use govingest_connectors::{
    ConnectorFactory, ExtractParams, extract_all_and_close, extract_and_close,
};
use govingest_core::contract::{SourceContract, SourceKind};
use govingest_core::error::Result;
use govingest_core::hash::{ChangeDetector, ChangeStatus, HashLedger};
use govingest_core::record::ExtractionResult;
use govingest_core::sink::RawSink;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The extraction outcome for one contract.
#[derive(Debug)]
pub struct SourceRun {
    pub source_name: String,
    pub outcome: Result<Vec<ExtractionResult>>,
}

/// What happened to one extraction result at the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistOutcome {
    pub status: ChangeStatus,
    pub artifact: Option<PathBuf>,
}

/// Load a contract file. Relative local endpoints of file sources resolve
/// against the workspace.
pub fn load_contract(path: &Path, workspace: &Path) -> Result<SourceContract> {
    let mut contract = SourceContract::load(path)?;
    let file_source = matches!(
        contract.kind(),
        SourceKind::Delimited | SourceKind::Spreadsheet | SourceKind::Document
    );
    if file_source
        && let Location::Local(local) = Location::parse(&contract.endpoint)
        && local.is_relative()
    {
        contract.endpoint = workspace.join(local).to_string_lossy().into_owned();
    }
    Ok(contract)
}

/// Extract one source. The connector is closed whether or not extraction
/// succeeds.
pub async fn extract_source(
    factory: &ConnectorFactory,
    contract: SourceContract,
    all_sheets: bool,
) -> Result<Vec<ExtractionResult>> {
    let mut connector = factory.build(contract)?;
    let params = ExtractParams::default();
    if all_sheets && connector.kind() == SourceKind::Spreadsheet {
        extract_all_and_close(connector.as_mut(), &params).await
    } else {
        Ok(vec![extract_and_close(connector.as_mut(), &params).await?])
    }
}

/// Extract several sources with at most `jobs` in flight. Output keeps the
/// input order; one failing source does not affect the others.
pub async fn extract_many(
    factory: &ConnectorFactory,
    contracts: Vec<SourceContract>,
    all_sheets: bool,
    jobs: usize,
) -> Vec<SourceRun> {
    stream::iter(contracts)
        .map(|contract| async move {
            let source_name = contract.source_name.clone();
            let outcome = extract_source(factory, contract, all_sheets).await;
            if let Err(e) = &outcome {
                warn!(source = %source_name, kind = e.kind(), error = %e, "Extraction failed");
            }
            SourceRun {
                source_name,
                outcome,
            }
        })
        .buffered(jobs.max(1))
        .collect()
        .await
}

/// Write `result` unless its content matches the last persisted run.
/// `force` writes regardless. The ledger advances only after a write.
pub fn persist_result<S: RawSink, L: HashLedger>(
    sink: &S,
    detector: &mut ChangeDetector<L>,
    result: &ExtractionResult,
    force: bool,
) -> Result<PersistOutcome> {
    let status = detector.assess(result);
    if !status.should_persist() && !force {
        info!(
            source = %result.metadata().source_name,
            hash = %result.metadata().content_hash,
            "Content unchanged, skipping artifact"
        );
        return Ok(PersistOutcome {
            status,
            artifact: None,
        });
    }
    let artifact = sink.write(result)?;
    detector.commit(result)?;
    Ok(PersistOutcome {
        status,
        artifact: Some(artifact),
    })
}
