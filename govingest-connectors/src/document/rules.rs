//! Regex extraction rules applied to document text.

use govingest_core::coerce::parse_date_with_format;
use govingest_core::contract::ExtractionRule;
use govingest_core::error::ParseError;
use govingest_core::record::{RawRow, Value};
use regex::{Regex, RegexBuilder};

/// A rule with its pattern compiled case-insensitive and multi-line.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    regex: Regex,
    field: String,
    format: Option<String>,
}

impl CompiledRule {
    pub fn compile(rule: &ExtractionRule) -> Result<Self, ParseError> {
        let regex = RegexBuilder::new(&rule.pattern)
            .case_insensitive(true)
            .multi_line(true)
            .build()
            .map_err(|e| ParseError::Document {
                message: format!("invalid pattern for '{}': {e}", rule.field),
            })?;
        Ok(Self {
            regex,
            field: rule.field.clone(),
            format: rule.format.clone(),
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Dates are parsed only for fields whose name mentions a date and whose
    /// rule names a format. Unparseable dates keep the raw text.
    fn to_value(&self, raw: &str) -> Value {
        match &self.format {
            Some(format) if self.field.to_lowercase().contains("date") => {
                parse_date_with_format(raw, format)
                    .map(Value::Date)
                    .unwrap_or_else(|| Value::Text(raw.to_string()))
            }
            _ => Value::Text(raw.to_string()),
        }
    }
}

/// One single-field record per non-empty match, rule by rule in order.
/// The first capture group is the value when the pattern has one.
pub fn apply_rules(text: &str, rules: &[CompiledRule]) -> Vec<RawRow> {
    let mut records = Vec::new();
    for rule in rules {
        for captures in rule.regex.captures_iter(text) {
            let matched = if captures.len() > 1 {
                captures.get(1)
            } else {
                captures.get(0)
            };
            let Some(value) = matched.map(|m| m.as_str()).filter(|v| !v.is_empty()) else {
                continue;
            };
            let mut record = RawRow::new();
            record.insert(rule.field.clone(), rule.to_value(value));
            records.push(record);
        }
    }
    records
}
