//! # Change detection
//!
//! Computes the deterministic content hash attached to every extraction result
//! and keeps a per-source ledger of the last persisted hash, so callers can
//! skip downstream work when upstream data has not changed.
//!
//! The content hash is a SHA-256 over a canonical, streamed encoding of the
//! rows: columns in batch order, each value tagged with its type, with
//! explicit field, row, and value separators. Metadata columns are never part
//! of the input. The hash is order-sensitive: an upstream row reordering is
//! reported as a change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::IngestError;
use crate::record::{ExtractionMetadata, ExtractionResult, RecordBatch, Value, is_metadata_column};

const FIELD_SEP: u8 = 0x1f;
const ROW_SEP: u8 = 0x1e;

/// SHA-256 of arbitrary bytes as a lowercase hex string.
pub fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash of a raw downloaded file, computed before parsing.
pub fn file_hash(bytes: &[u8]) -> String {
    hex_sha256(bytes)
}

/// Deterministic hash over row content, excluding metadata columns.
pub fn content_hash(batch: &RecordBatch) -> String {
    let mut hasher = Sha256::new();
    let columns: Vec<&String> = batch
        .columns()
        .iter()
        .filter(|c| !is_metadata_column(c))
        .collect();

    for column in &columns {
        hasher.update(column.as_bytes());
        hasher.update([FIELD_SEP]);
    }
    hasher.update([ROW_SEP]);

    for row in batch.rows() {
        for column in &columns {
            let value = row.get(column.as_str()).unwrap_or(&Value::Null);
            update_value(&mut hasher, value);
            hasher.update([FIELD_SEP]);
        }
        hasher.update([ROW_SEP]);
    }
    format!("{:x}", hasher.finalize())
}

fn update_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(b) => hasher.update(if *b { b"b1" } else { b"b0" }),
        Value::Number(n) => {
            hasher.update(b"f");
            hasher.update(n.to_string().as_bytes());
        }
        Value::Date(d) => {
            hasher.update(b"d");
            hasher.update(d.format("%Y-%m-%d").to_string().as_bytes());
        }
        Value::DateTime(dt) => {
            hasher.update(b"t");
            hasher.update(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string().as_bytes());
        }
        Value::Text(s) => {
            hasher.update(b"s");
            hasher.update(s.as_bytes());
        }
    }
}

/// Whether a run carries new content compared to the last persisted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeStatus {
    /// No previous run recorded for this source.
    New,
    /// Same content hash as the last persisted run.
    Unchanged,
    /// Content differs from the last persisted run.
    Changed { previous_hash: String },
}

impl ChangeStatus {
    pub fn should_persist(&self) -> bool {
        !matches!(self, ChangeStatus::Unchanged)
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeStatus::New => write!(f, "new"),
            ChangeStatus::Unchanged => write!(f, "unchanged"),
            ChangeStatus::Changed { .. } => write!(f, "changed"),
        }
    }
}

/// A ledger entry: the last persisted hash for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub content_hash: String,
    pub recorded_at: DateTime<Utc>,
}

/// Storage for the last persisted content hash per source.
pub trait HashLedger: Send {
    fn last_hash(&self, source_name: &str) -> Option<String>;

    fn record(
        &mut self,
        source_name: &str,
        content_hash: &str,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), IngestError>;
}

/// In-memory ledger, for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct InMemoryHashLedger {
    entries: BTreeMap<String, LedgerEntry>,
}

impl InMemoryHashLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashLedger for InMemoryHashLedger {
    fn last_hash(&self, source_name: &str) -> Option<String> {
        self.entries
            .get(source_name)
            .map(|e| e.content_hash.clone())
    }

    fn record(
        &mut self,
        source_name: &str,
        content_hash: &str,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        self.entries.insert(
            source_name.to_string(),
            LedgerEntry {
                content_hash: content_hash.to_string(),
                recorded_at,
            },
        );
        Ok(())
    }
}

/// JSON-file ledger stored next to the raw artifacts.
#[derive(Debug)]
pub struct FileHashLedger {
    path: PathBuf,
    entries: BTreeMap<String, LedgerEntry>,
}

impl FileHashLedger {
    pub const FILE_NAME: &'static str = ".hash_ledger.json";

    /// Open (or start) the ledger at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IngestError> {
        let path = path.into();
        let entries = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    /// Open the ledger inside a raw-layer directory.
    pub fn in_dir(dir: &Path) -> Result<Self, IngestError> {
        Self::open(dir.join(Self::FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry(&self, source_name: &str) -> Option<&LedgerEntry> {
        self.entries.get(source_name)
    }

    fn save(&self) -> Result<(), IngestError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        // Write-then-rename so a crash never leaves a truncated ledger.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl HashLedger for FileHashLedger {
    fn last_hash(&self, source_name: &str) -> Option<String> {
        self.entries
            .get(source_name)
            .map(|e| e.content_hash.clone())
    }

    fn record(
        &mut self,
        source_name: &str,
        content_hash: &str,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        self.entries.insert(
            source_name.to_string(),
            LedgerEntry {
                content_hash: content_hash.to_string(),
                recorded_at,
            },
        );
        self.save()
    }
}

/// Compares new results with the ledger and records persisted runs.
pub struct ChangeDetector<L: HashLedger> {
    ledger: L,
}

impl<L: HashLedger> ChangeDetector<L> {
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }

    /// Compare a result with the last persisted run for its source.
    pub fn assess(&self, result: &ExtractionResult) -> ChangeStatus {
        let metadata = result.metadata();
        match self.ledger.last_hash(&ledger_key(metadata)) {
            None => ChangeStatus::New,
            Some(previous) if previous == metadata.content_hash => ChangeStatus::Unchanged,
            Some(previous_hash) => ChangeStatus::Changed { previous_hash },
        }
    }

    /// Record that `result` has been persisted.
    pub fn commit(&mut self, result: &ExtractionResult) -> Result<(), IngestError> {
        let metadata = result.metadata();
        self.ledger.record(
            &ledger_key(metadata),
            &metadata.content_hash,
            metadata.extracted_at,
        )
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }
}

/// Ledger key for a result: the source name, qualified by sheet for
/// per-sheet spreadsheet results.
pub fn ledger_key(metadata: &ExtractionMetadata) -> String {
    match &metadata.sheet_name {
        Some(sheet) => format!("{}/{}", metadata.source_name, sheet),
        None => metadata.source_name.clone(),
    }
}
