//! Schema validation for extracted batches.
//!
//! A required field missing from the column set is fatal. Nulls inside a
//! present required field only produce warnings once their share exceeds the
//! configured tolerance; rows are never dropped here.

use tracing::{info, warn};

use crate::contract::SchemaField;
use crate::error::SchemaError;
use crate::record::{NullWarning, RecordBatch};

/// Outcome of a successful validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub warnings: Vec<NullWarning>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Checks declared schema fields against a batch.
#[derive(Debug, Clone, Copy)]
pub struct SchemaValidator {
    /// Share of nulls (0.0–1.0) a required field may contain before a
    /// warning is emitted.
    null_tolerance: f64,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl SchemaValidator {
    pub fn new(null_tolerance: f64) -> Self {
        Self {
            null_tolerance: null_tolerance.clamp(0.0, 1.0),
        }
    }

    pub fn null_tolerance(&self) -> f64 {
        self.null_tolerance
    }

    /// Validate `batch` for `source_name` against `schema`.
    pub fn validate(
        &self,
        source_name: &str,
        batch: &RecordBatch,
        schema: &[SchemaField],
    ) -> Result<ValidationReport, SchemaError> {
        info!(
            source = source_name,
            rows = batch.len(),
            fields = schema.len(),
            "Validating batch"
        );

        // Presence first, so a failing run reports before any null analysis.
        if let Some(missing) = schema
            .iter()
            .find(|field| field.required && !batch.has_column(&field.name))
        {
            return Err(SchemaError::MissingRequiredField {
                source_name: source_name.to_string(),
                field: missing.name.clone(),
            });
        }

        let row_count = batch.len();
        let mut report = ValidationReport::default();
        for field in schema.iter().filter(|f| f.required) {
            let null_count = batch.null_count(&field.name);
            if null_count == 0 {
                continue;
            }
            let ratio = null_count as f64 / row_count.max(1) as f64;
            if ratio > self.null_tolerance {
                warn!(
                    source = source_name,
                    field = %field.name,
                    null_count,
                    row_count,
                    "Null values in required field"
                );
                report.warnings.push(NullWarning {
                    field: field.name.clone(),
                    null_count,
                    row_count,
                });
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RawRow, Value};

    fn batch(rows: &[&[(&str, Value)]]) -> RecordBatch {
        let mut batch = RecordBatch::new();
        for pairs in rows {
            let row: RawRow = pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            batch.push(row);
        }
        batch.normalize();
        batch
    }

    #[test]
    fn test_missing_required_field_fails() {
        let batch = batch(&[&[("name", "Acme".into())]]);
        let schema = vec![SchemaField::required("name"), SchemaField::required("inn")];
        let err = SchemaValidator::default()
            .validate("reestr_po", &batch, &schema)
            .unwrap_err();
        let SchemaError::MissingRequiredField { field, .. } = err;
        assert_eq!(field, "inn");
    }

    #[test]
    fn test_missing_optional_field_is_fine() {
        let batch = batch(&[&[("name", "Acme".into())]]);
        let schema = vec![SchemaField::optional("vendor")];
        let report = SchemaValidator::default()
            .validate("reestr_po", &batch, &schema)
            .unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn test_nulls_in_required_field_warn() {
        let batch = batch(&[
            &[("name", "Acme".into())],
            &[("name", Value::Null)],
            &[("name", "Beta".into())],
        ]);
        let schema = vec![SchemaField::required("name")];
        let report = SchemaValidator::default()
            .validate("reestr_po", &batch, &schema)
            .unwrap();
        assert_eq!(
            report.warnings,
            vec![NullWarning {
                field: "name".into(),
                null_count: 1,
                row_count: 3,
            }]
        );
    }

    #[test]
    fn test_nulls_within_tolerance_are_silent() {
        let batch = batch(&[
            &[("name", "Acme".into())],
            &[("name", Value::Null)],
            &[("name", "Beta".into())],
            &[("name", "Gamma".into())],
        ]);
        let schema = vec![SchemaField::required("name")];
        let report = SchemaValidator::new(0.5)
            .validate("reestr_po", &batch, &schema)
            .unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn test_empty_batch_without_columns_fails_required() {
        let schema = vec![SchemaField::required("name")];
        let result = SchemaValidator::default().validate("x", &RecordBatch::new(), &schema);
        assert!(result.is_err());
    }

    #[test]
    fn test_tolerance_is_clamped() {
        assert_eq!(SchemaValidator::new(4.0).null_tolerance(), 1.0);
        assert_eq!(SchemaValidator::new(-1.0).null_tolerance(), 0.0);
    }
}
