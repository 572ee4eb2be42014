//! CLI subcommand handlers.

use crate::Commands;
use crate::runner::{self, SourceRun};
use govingest_connectors::ConnectorFactory;
use govingest_core::config::{IngestConfig, load_config};
use govingest_core::contract::{SourceContract, discover_contracts, resolve_contract_path};
use govingest_core::hash::{ChangeDetector, FileHashLedger};
use govingest_core::sink::JsonlSink;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    let config = load_config(Some(workspace), config_file, None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    match command {
        Commands::Run {
            contracts,
            all_sheets,
            force,
            jobs,
        } => handle_run(&config, workspace, &contracts, all_sheets, force, jobs).await,
        Commands::Check { contracts } => handle_check(&config, workspace, &contracts),
        Commands::List => handle_list(&config, workspace),
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Contract files named on the command line, or every contract in the
/// contracts directory when none are named.
fn contract_paths(
    config: &IngestConfig,
    workspace: &Path,
    names: &[String],
) -> anyhow::Result<Vec<PathBuf>> {
    let dir = config.paths.contracts_dir_in(workspace);
    if names.is_empty() {
        let paths = discover_contracts(&dir)?;
        if paths.is_empty() {
            anyhow::bail!("No contracts found in {}", dir.display());
        }
        return Ok(paths);
    }
    Ok(names
        .iter()
        .map(|name| resolve_contract_path(&dir, name))
        .collect())
}

async fn handle_run(
    config: &IngestConfig,
    workspace: &Path,
    names: &[String],
    all_sheets: bool,
    force: bool,
    jobs: usize,
) -> anyhow::Result<()> {
    let paths = contract_paths(config, workspace, names)?;
    let total = paths.len();

    let mut contracts = Vec::with_capacity(total);
    let mut failures = 0usize;
    for path in &paths {
        match runner::load_contract(path, workspace) {
            Ok(contract) => contracts.push(contract),
            Err(e) => {
                failures += 1;
                error!(path = %path.display(), error = %e, "Invalid contract");
                eprintln!("  {}: {}", path.display(), e);
            }
        }
    }

    let factory = ConnectorFactory::new(config);
    let runs = runner::extract_many(&factory, contracts, all_sheets, jobs).await;

    let raw_dir = config.paths.raw_dir_in(workspace);
    let sink = JsonlSink::new(&raw_dir);
    let mut detector = ChangeDetector::new(FileHashLedger::in_dir(&raw_dir)?);

    for SourceRun {
        source_name,
        outcome,
    } in runs
    {
        let results = match outcome {
            Ok(results) => results,
            Err(e) => {
                failures += 1;
                eprintln!("  {}: {}", source_name, e);
                continue;
            }
        };
        let mut source_failed = false;
        for result in &results {
            let label = match &result.metadata().sheet_name {
                Some(sheet) => format!("{source_name} [{sheet}]"),
                None => source_name.clone(),
            };
            match runner::persist_result(&sink, &mut detector, result, force) {
                Ok(persisted) => {
                    let stats = result.stats();
                    let target = persisted
                        .artifact
                        .as_deref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "skipped".to_string());
                    println!(
                        "  {}: {} rows, {} ({})",
                        label, stats.row_count, persisted.status, target
                    );
                    for warning in &stats.null_warnings {
                        println!(
                            "    warning: {} null in {}/{} rows",
                            warning.field, warning.null_count, warning.row_count
                        );
                    }
                }
                Err(e) => {
                    source_failed = true;
                    error!(source = %label, error = %e, "Failed to persist result");
                    eprintln!("  {}: {}", label, e);
                }
            }
        }
        if source_failed {
            failures += 1;
        }
    }

    info!(sources = total, failures, "Run finished");
    if failures > 0 {
        anyhow::bail!("{} of {} sources failed", failures, total);
    }
    Ok(())
}

fn handle_check(config: &IngestConfig, workspace: &Path, names: &[String]) -> anyhow::Result<()> {
    let paths = contract_paths(config, workspace, names)?;
    let mut invalid = 0usize;
    for path in &paths {
        match runner::load_contract(path, workspace) {
            Ok(contract) => println!(
                "  ok       {} ({}, {} schema fields)",
                contract.source_name,
                contract.kind(),
                contract.schema.len()
            ),
            Err(e) => {
                invalid += 1;
                println!("  invalid  {}: {}", path.display(), e);
            }
        }
    }
    if invalid > 0 {
        anyhow::bail!("{} of {} contracts are invalid", invalid, paths.len());
    }
    Ok(())
}

fn handle_list(config: &IngestConfig, workspace: &Path) -> anyhow::Result<()> {
    let dir = config.paths.contracts_dir_in(workspace);
    let paths = discover_contracts(&dir)?;
    if paths.is_empty() {
        println!("No contracts in {}.", dir.display());
        return Ok(());
    }
    println!("Contracts in {} ({}):", dir.display(), paths.len());
    for path in paths {
        match SourceContract::load(&path) {
            Ok(contract) => println!(
                "  {:<24} {:<12} {}",
                contract.source_name,
                contract.kind().as_str(),
                contract.endpoint
            ),
            Err(e) => println!("  {:<24} invalid: {}", path.display(), e),
        }
    }
    Ok(())
}
