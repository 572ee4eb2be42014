//! Per-cell cleanup and type coercion shared by the format adapters.
//!
//! Coercion never fails: values that cannot be interpreted as the requested
//! kind resolve to [`Value::Null`] and are logged at debug level.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::record::Value;

/// Primary date format used by Russian government registries.
pub const PRIMARY_DATE_FORMAT: &str = "%d.%m.%Y";

/// Generic date formats tried after the primary one.
const FALLBACK_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%Y.%m.%d",
    "%d %B %Y",
    "%B %d, %Y",
];

const FALLBACK_DATETIME_FORMATS: &[&str] =
    &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%d.%m.%Y %H:%M"];

/// Tokens treated as `true` by boolean coercion (compared case-insensitively).
pub const TRUTHY_TOKENS: &[&str] = &["да", "д", "true", "1", "yes", "y", "✓"];

/// Tokens treated as "no value" before any coercion.
const NULL_TOKENS: &[&str] = &["", "-", "—"];

/// How a field's raw text should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Trimmed text, promoted to a number when numeric-shaped.
    Text,
    /// Numeric; anything else becomes null.
    Number,
    /// Date; primary format then generic fallbacks, null on failure.
    Date,
    /// Boolean against [`TRUTHY_TOKENS`].
    Boolean,
    /// Registry identifiers (INN, OGRN, ...): digits only.
    Identifier,
}

impl FieldKind {
    /// Infer the kind from a field name when the contract does not declare one.
    pub fn infer(field: &str) -> Self {
        let name = field.to_lowercase();
        if name.split(['_', '-', ' ', '.']).any(|token| token == "date") {
            return FieldKind::Date;
        }
        if name.starts_with("is_") || name.starts_with("has_") {
            return FieldKind::Boolean;
        }
        const IDENTIFIERS: &[&str] = &["inn", "ogrn", "ogrnip", "kpp", "snils"];
        let is_identifier = IDENTIFIERS
            .iter()
            .any(|id| name == *id || name.ends_with(&format!("_{id}")));
        if is_identifier {
            return FieldKind::Identifier;
        }
        FieldKind::Text
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Text => write!(f, "text"),
            FieldKind::Number => write!(f, "number"),
            FieldKind::Date => write!(f, "date"),
            FieldKind::Boolean => write!(f, "boolean"),
            FieldKind::Identifier => write!(f, "identifier"),
        }
    }
}

/// Clean a raw cell string and coerce it to `kind`.
pub fn clean_value(raw: &str, kind: FieldKind) -> Value {
    let value = raw.trim();
    if NULL_TOKENS.contains(&value) {
        return Value::Null;
    }

    match kind {
        FieldKind::Date => match parse_date(value) {
            Some(date) => Value::Date(date),
            None => {
                tracing::debug!(value, "Unparseable date, storing null");
                Value::Null
            }
        },
        FieldKind::Boolean => Value::Bool(is_truthy(value)),
        FieldKind::Identifier => {
            let digits: String = value.chars().filter(char::is_ascii_digit).collect();
            if digits.is_empty() {
                Value::Null
            } else {
                Value::Text(digits)
            }
        }
        FieldKind::Number => match parse_number(value) {
            Some(n) => Value::Number(n),
            None => {
                tracing::debug!(value, "Non-numeric value in numeric field, storing null");
                Value::Null
            }
        },
        FieldKind::Text => match parse_number(value) {
            Some(n) => Value::Number(n),
            None => Value::Text(value.to_string()),
        },
    }
}

/// Infer a value from untyped file content: null, number, or text.
pub fn infer_value(raw: &str) -> Value {
    clean_value(raw, FieldKind::Text)
}

/// True when `value` is one of the truthy tokens.
pub fn is_truthy(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    TRUTHY_TOKENS.contains(&lowered.as_str())
}

/// Parse a date: the primary `dd.mm.yyyy` format first, then generic fallbacks.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, PRIMARY_DATE_FORMAT) {
        return Some(date);
    }
    for format in FALLBACK_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }
    for format in FALLBACK_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Parse a date with an explicit chrono format string.
pub fn parse_date_with_format(value: &str, format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), format).ok()
}

/// True when the string consists of digits plus `.`, `,` and `-` only.
pub fn is_numeric_shaped(value: &str) -> bool {
    let mut has_digit = false;
    for c in value.chars() {
        match c {
            '0'..='9' => has_digit = true,
            '.' | ',' | '-' => {}
            _ => return false,
        }
    }
    has_digit
}

/// Parse a numeric-shaped string, accepting a comma decimal separator.
pub fn parse_number(value: &str) -> Option<f64> {
    let value = value.trim();
    if !is_numeric_shaped(value) {
        return None;
    }
    value.replace(',', ".").parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_kind_from_name() {
        assert_eq!(FieldKind::infer("registration_date"), FieldKind::Date);
        assert_eq!(FieldKind::infer("is_domestic"), FieldKind::Boolean);
        assert_eq!(FieldKind::infer("vendor_inn"), FieldKind::Identifier);
        assert_eq!(FieldKind::infer("inn"), FieldKind::Identifier);
        assert_eq!(FieldKind::infer("innovation"), FieldKind::Text);
        assert_eq!(FieldKind::infer("date"), FieldKind::Date);
        assert_eq!(FieldKind::infer("date_from"), FieldKind::Date);
        assert_eq!(FieldKind::infer("candidate"), FieldKind::Text);
        assert_eq!(FieldKind::infer("update_count"), FieldKind::Text);
        assert_eq!(FieldKind::infer("name"), FieldKind::Text);
    }

    #[test]
    fn test_clean_value_null_tokens() {
        assert_eq!(clean_value("  ", FieldKind::Text), Value::Null);
        assert_eq!(clean_value("-", FieldKind::Number), Value::Null);
    }

    #[test]
    fn test_clean_value_dates() {
        assert_eq!(
            clean_value("15.03.2024", FieldKind::Date),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
        assert_eq!(
            clean_value("2024-03-15", FieldKind::Date),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
        assert_eq!(clean_value("31.02.2024", FieldKind::Date), Value::Null);
        assert_eq!(clean_value("soon", FieldKind::Date), Value::Null);
    }

    #[test]
    fn test_clean_value_boolean() {
        assert_eq!(clean_value("Да", FieldKind::Boolean), Value::Bool(true));
        assert_eq!(clean_value("✓", FieldKind::Boolean), Value::Bool(true));
        assert_eq!(clean_value("Нет", FieldKind::Boolean), Value::Bool(false));
    }

    #[test]
    fn test_clean_value_identifier() {
        assert_eq!(
            clean_value("ИНН 7707-083893", FieldKind::Identifier),
            Value::Text("7707083893".into())
        );
        assert_eq!(clean_value("n/a", FieldKind::Identifier), Value::Null);
    }

    #[test]
    fn test_clean_value_number() {
        assert_eq!(clean_value("12,5", FieldKind::Number), Value::Number(12.5));
        assert_eq!(clean_value("abc", FieldKind::Number), Value::Null);
        assert_eq!(clean_value("1.2.3", FieldKind::Number), Value::Null);
    }

    #[test]
    fn test_clean_value_text_promotes_numbers() {
        assert_eq!(clean_value(" 42 ", FieldKind::Text), Value::Number(42.0));
        assert_eq!(clean_value("-3", FieldKind::Text), Value::Number(-3.0));
        assert_eq!(
            clean_value(" Acme ", FieldKind::Text),
            Value::Text("Acme".into())
        );
        // Numeric-shaped but unparseable stays text.
        assert_eq!(
            clean_value("01.02.2024", FieldKind::Text),
            Value::Text("01.02.2024".into())
        );
    }

    #[test]
    fn test_parse_date_with_format() {
        assert_eq!(
            parse_date_with_format("2024/12/01", "%Y/%m/%d"),
            NaiveDate::from_ymd_opt(2024, 12, 1)
        );
        assert_eq!(parse_date_with_format("01.12.2024", "%Y/%m/%d"), None);
    }

    #[test]
    fn test_field_kind_display() {
        assert_eq!(FieldKind::Identifier.to_string(), "identifier");
    }
}
