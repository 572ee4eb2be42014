//! Raw record model: cell values, row batches, and the extraction result.
//!
//! Every connector produces a [`RecordBatch`]; the shared finishing step turns
//! it into an immutable [`ExtractionResult`] carrying the run metadata.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata column: source name.
pub const META_SOURCE: &str = "_source";
/// Metadata column: run timestamp.
pub const META_EXTRACTED_AT: &str = "_extracted_at";
/// Metadata column: content hash of the whole batch.
pub const META_DATA_HASH: &str = "_data_hash";
/// Metadata column: hash of the raw downloaded file.
pub const META_FILE_HASH: &str = "_file_hash";
/// Metadata column: detected document type.
pub const META_FILE_TYPE: &str = "_file_type";
/// Metadata column: spreadsheet sheet name.
pub const META_SHEET_NAME: &str = "_sheet_name";

/// A single cell value after format-specific coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Build a text value, mapping blank strings to `Null`.
    pub fn text(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.trim().is_empty() {
            Value::Null
        } else {
            Value::Text(s)
        }
    }

    /// Convert a JSON scalar into a cell value. Arrays and objects are kept as
    /// their compact JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    /// Convert into a JSON value for the raw-layer artifact.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string())
            }
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

/// One extracted row: field name to value.
pub type RawRow = BTreeMap<String, Value>;

/// Ordered rows plus the column set in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    columns: Vec<String>,
    rows: Vec<RawRow>,
}

impl RecordBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty batch that already knows its column set (e.g. from a
    /// delimited file header).
    pub fn with_columns(columns: Vec<String>) -> Self {
        let mut batch = Self::new();
        for column in columns {
            batch.register_column(&column);
        }
        batch
    }

    fn register_column(&mut self, name: &str) {
        if !self.columns.iter().any(|c| c == name) {
            self.columns.push(name.to_string());
        }
    }

    /// Append a row, registering any columns not seen before.
    pub fn push(&mut self, row: RawRow) {
        for key in row.keys() {
            self.register_column(key);
        }
        self.rows.push(row);
    }

    /// Append every row of `other`, preserving order.
    pub fn extend(&mut self, other: RecordBatch) {
        for column in &other.columns {
            self.register_column(column);
        }
        self.rows.extend(other.rows);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Count null (or absent) values in a column.
    pub fn null_count(&self, column: &str) -> usize {
        self.rows
            .iter()
            .filter(|row| row.get(column).is_none_or(Value::is_null))
            .count()
    }

    /// Fill absent columns with `Null` so every row shares the same field set.
    pub fn normalize(&mut self) {
        for row in &mut self.rows {
            for column in &self.columns {
                row.entry(column.clone()).or_insert(Value::Null);
            }
        }
    }

    /// Rename columns according to `mapping` (old name to new name).
    ///
    /// Columns not in the mapping are left as-is. If a rename collides with an
    /// existing column the renamed value wins.
    pub fn rename_columns(&mut self, mapping: &BTreeMap<String, String>) {
        if mapping.is_empty() {
            return;
        }
        let mut renamed: Vec<String> = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let target = mapping.get(column).unwrap_or(column);
            if !renamed.contains(target) {
                renamed.push(target.clone());
            }
        }
        self.columns = renamed;

        for row in &mut self.rows {
            let old = std::mem::take(row);
            let mut kept: RawRow = BTreeMap::new();
            let mut moved: RawRow = BTreeMap::new();
            for (key, value) in old {
                match mapping.get(&key) {
                    Some(target) => {
                        moved.insert(target.clone(), value);
                    }
                    None => {
                        kept.insert(key, value);
                    }
                }
            }
            kept.extend(moved);
            *row = kept;
        }
    }
}

/// Metadata attached to every row of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub source_name: String,
    pub extracted_at: DateTime<Utc>,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

/// Warning raised for a required field that contains nulls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullWarning {
    pub field: String,
    pub null_count: usize,
    pub row_count: usize,
}

/// Per-run statistics returned to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub row_count: usize,
    pub column_count: usize,
    pub pages_fetched: usize,
    pub bytes_read: u64,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub null_warnings: Vec<NullWarning>,
}

/// The immutable output of a single `extract` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    batch: RecordBatch,
    metadata: ExtractionMetadata,
    stats: RunStats,
}

impl ExtractionResult {
    pub fn new(batch: RecordBatch, metadata: ExtractionMetadata, stats: RunStats) -> Self {
        Self {
            batch,
            metadata,
            stats,
        }
    }

    pub fn rows(&self) -> &[RawRow] {
        self.batch.rows()
    }

    pub fn columns(&self) -> &[String] {
        self.batch.columns()
    }

    pub fn row_count(&self) -> usize {
        self.batch.len()
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn metadata(&self) -> &ExtractionMetadata {
        &self.metadata
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Rows as JSON objects with the metadata columns appended, in the shape
    /// written to the raw layer.
    pub fn tagged_rows(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        let extracted_at = self.metadata.extracted_at.to_rfc3339();
        self.batch
            .rows()
            .iter()
            .map(|row| {
                let mut object = serde_json::Map::new();
                for column in self.batch.columns() {
                    let value = row.get(column).map(Value::to_json).unwrap_or_default();
                    object.insert(column.clone(), value);
                }
                object.insert(META_SOURCE.into(), self.metadata.source_name.clone().into());
                object.insert(META_EXTRACTED_AT.into(), extracted_at.clone().into());
                object.insert(
                    META_DATA_HASH.into(),
                    self.metadata.content_hash.clone().into(),
                );
                if let Some(file_hash) = &self.metadata.file_hash {
                    object.insert(META_FILE_HASH.into(), file_hash.clone().into());
                }
                if let Some(file_type) = &self.metadata.file_type {
                    object.insert(META_FILE_TYPE.into(), file_type.clone().into());
                }
                if let Some(sheet) = &self.metadata.sheet_name {
                    object.insert(META_SHEET_NAME.into(), sheet.clone().into());
                }
                object
            })
            .collect()
    }
}

/// Returns true for the reserved metadata column names.
pub fn is_metadata_column(name: &str) -> bool {
    matches!(
        name,
        META_SOURCE
            | META_EXTRACTED_AT
            | META_DATA_HASH
            | META_FILE_HASH
            | META_FILE_TYPE
            | META_SHEET_NAME
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(pairs: &[(&str, Value)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_columns_first_seen_order() {
        let mut batch = RecordBatch::new();
        batch.push(row(&[("b", "1".into()), ("a", "2".into())]));
        batch.push(row(&[("c", "3".into())]));
        // BTreeMap keys arrive sorted within a row, new columns append.
        assert_eq!(batch.columns(), &["a", "b", "c"]);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_normalize_fills_nulls() {
        let mut batch = RecordBatch::new();
        batch.push(row(&[("name", "Acme".into())]));
        batch.push(row(&[("price", 10.0.into())]));
        batch.normalize();
        assert_eq!(batch.rows()[0].get("price"), Some(&Value::Null));
        assert_eq!(batch.rows()[1].get("name"), Some(&Value::Null));
        assert_eq!(batch.null_count("name"), 1);
    }

    #[test]
    fn test_rename_columns() {
        let mut batch = RecordBatch::new();
        batch.push(row(&[("Наименование", "Acme".into()), ("ИНН", "77".into())]));
        let mapping: BTreeMap<String, String> = [
            ("Наименование".to_string(), "name".to_string()),
            ("ИНН".to_string(), "vendor_inn".to_string()),
        ]
        .into_iter()
        .collect();
        batch.rename_columns(&mapping);
        assert!(batch.has_column("name"));
        assert!(batch.has_column("vendor_inn"));
        assert!(!batch.has_column("ИНН"));
        assert_eq!(batch.rows()[0].get("name"), Some(&Value::from("Acme")));
    }

    #[test]
    fn test_value_text_blank_is_null() {
        assert_eq!(Value::text("   "), Value::Null);
        assert_eq!(Value::text("x"), Value::Text("x".into()));
    }

    #[test]
    fn test_value_from_json_nested() {
        let v = Value::from_json(&serde_json::json!([1, 2]));
        assert_eq!(v, Value::Text("[1,2]".into()));
        assert_eq!(Value::from_json(&serde_json::json!(3)), Value::Number(3.0));
    }

    #[test]
    fn test_tagged_rows_include_metadata() {
        let mut batch = RecordBatch::new();
        batch.push(row(&[("name", "Acme".into())]));
        let metadata = ExtractionMetadata {
            source_name: "reestr_po".into(),
            extracted_at: Utc::now(),
            content_hash: "abc".into(),
            file_hash: Some("def".into()),
            sheet_name: None,
            file_type: None,
        };
        let result = ExtractionResult::new(batch, metadata, RunStats::default());
        let tagged = result.tagged_rows();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0][META_SOURCE], "reestr_po");
        assert_eq!(tagged[0][META_DATA_HASH], "abc");
        assert_eq!(tagged[0][META_FILE_HASH], "def");
        assert!(!tagged[0].contains_key(META_SHEET_NAME));
    }

    #[test]
    fn test_metadata_column_names() {
        assert!(is_metadata_column("_data_hash"));
        assert!(!is_metadata_column("name"));
    }
}
