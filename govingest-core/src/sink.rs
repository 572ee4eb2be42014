//! Raw-layer sink: one immutable, timestamped artifact per run.
//!
//! Artifacts are JSON Lines files named `<source>_<YYYYmmdd_HHMMSS>.jsonl`
//! (with the sheet name inserted for per-sheet spreadsheet results). Each line
//! is one row with the metadata columns appended. Existing artifacts are never
//! overwritten.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::IngestError;
use crate::record::ExtractionResult;

/// Destination for extraction results.
pub trait RawSink {
    /// Persist `result`, returning the artifact location.
    fn write(&self, result: &ExtractionResult) -> Result<PathBuf, IngestError>;
}

/// Writes JSON Lines artifacts into a directory.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    dir: PathBuf,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Artifact file name for a result.
    pub fn artifact_name(result: &ExtractionResult) -> String {
        let metadata = result.metadata();
        let stamp = metadata.extracted_at.format("%Y%m%d_%H%M%S");
        match &metadata.sheet_name {
            Some(sheet) => format!(
                "{}_{}_{}.jsonl",
                sanitize(&metadata.source_name),
                sanitize(sheet),
                stamp
            ),
            None => format!("{}_{}.jsonl", sanitize(&metadata.source_name), stamp),
        }
    }
}

impl RawSink for JsonlSink {
    fn write(&self, result: &ExtractionResult) -> Result<PathBuf, IngestError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::artifact_name(result));

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        let mut writer = std::io::BufWriter::new(file);
        for row in result.tagged_rows() {
            serde_json::to_writer(&mut writer, &row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        tracing::info!(
            source = %result.metadata().source_name,
            rows = result.row_count(),
            path = %path.display(),
            "Wrote raw artifact"
        );
        Ok(path)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::content_hash;
    use crate::record::{ExtractionMetadata, RawRow, RecordBatch, RunStats, Value};
    use chrono::{TimeZone, Utc};

    fn sample(sheet: Option<&str>) -> ExtractionResult {
        let mut batch = RecordBatch::new();
        let row: RawRow = [("name".to_string(), Value::from("Acme"))]
            .into_iter()
            .collect();
        batch.push(row);
        let metadata = ExtractionMetadata {
            source_name: "reestr_po".into(),
            extracted_at: Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap(),
            content_hash: content_hash(&batch),
            file_hash: None,
            sheet_name: sheet.map(String::from),
            file_type: None,
        };
        ExtractionResult::new(batch, metadata, RunStats::default())
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(
            JsonlSink::artifact_name(&sample(None)),
            "reestr_po_20240506_070809.jsonl"
        );
        assert_eq!(
            JsonlSink::artifact_name(&sample(Some("Лист 1"))),
            "reestr_po_Лист_1_20240506_070809.jsonl"
        );
    }

    #[test]
    fn test_write_jsonl_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(dir.path().join("raw"));
        let result = sample(None);
        let path = sink.write(&result).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        let row: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(row["name"], "Acme");
        assert_eq!(row["_source"], "reestr_po");
        assert_eq!(row["_data_hash"], result.metadata().content_hash.as_str());
    }

    #[test]
    fn test_write_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(dir.path());
        sink.write(&sample(None)).unwrap();
        assert!(sink.write(&sample(None)).is_err());
    }
}
