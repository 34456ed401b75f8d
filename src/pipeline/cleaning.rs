//! Value normalization for loosely typed source columns
//!
//! Source tables store numbers as text now and then (`""`, `"1,250.5"`,
//! `"NaN"`), timestamps as epoch integers or ISO strings, and booleans as
//! whatever the bot felt like. Every helper maps unusable input to NULL.

use super::types::FieldValue;
use chrono::{DateTime, NaiveDateTime};

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Trimmed text, `None` when empty or NULL
pub fn clean_text(value: &FieldValue) -> Option<String> {
    let text = match value {
        FieldValue::Null => return None,
        FieldValue::Text(s) => s.trim().to_string(),
        FieldValue::Integer(i) => i.to_string(),
        FieldValue::Real(f) => f.to_string(),
        FieldValue::Bool(b) => b.to_string(),
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Finite number, `None` for empty or unparsable text
pub fn clean_numeric(value: &FieldValue) -> Option<f64> {
    let number = match value {
        FieldValue::Null => return None,
        FieldValue::Integer(i) => *i as f64,
        FieldValue::Real(f) => *f,
        FieldValue::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        FieldValue::Text(s) => {
            let stripped: String = s.trim().chars().filter(|c| *c != ',').collect();
            stripped.parse::<f64>().ok()?
        }
    };

    number.is_finite().then_some(number)
}

/// Unix seconds from an epoch number or an ISO-8601 / SQL timestamp string
pub fn clean_timestamp(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Integer(i) => Some(*i),
        FieldValue::Real(f) if f.is_finite() => Some(f.trunc() as i64),
        FieldValue::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(epoch) = s.parse::<i64>() {
                return Some(epoch);
            }
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                return Some(parsed.timestamp());
            }
            TIMESTAMP_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc().timestamp())
        }
        _ => None,
    }
}

pub fn clean_bool(value: &FieldValue) -> Option<bool> {
    match value {
        FieldValue::Bool(b) => Some(*b),
        FieldValue::Integer(i) => Some(*i != 0),
        FieldValue::Real(f) => Some(*f != 0.0),
        FieldValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        FieldValue::Null => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_numeric() {
        assert_eq!(clean_numeric(&FieldValue::from(" 12.5 ")), Some(12.5));
        assert_eq!(clean_numeric(&FieldValue::from("1,250")), Some(1250.0));
        assert_eq!(clean_numeric(&FieldValue::from(7_i64)), Some(7.0));
        assert_eq!(clean_numeric(&FieldValue::from("")), None);
        assert_eq!(clean_numeric(&FieldValue::from("n/a")), None);
        assert_eq!(clean_numeric(&FieldValue::from("NaN")), None);
        assert_eq!(clean_numeric(&FieldValue::Null), None);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text(&FieldValue::from("  Raydium ")), Some("Raydium".to_string()));
        assert_eq!(clean_text(&FieldValue::from("   ")), None);
        assert_eq!(clean_text(&FieldValue::from(42_i64)), Some("42".to_string()));
    }

    #[test]
    fn test_clean_timestamp_formats() {
        assert_eq!(clean_timestamp(&FieldValue::from(1_700_000_000_i64)), Some(1_700_000_000));
        assert_eq!(clean_timestamp(&FieldValue::from("1700000000")), Some(1_700_000_000));
        assert_eq!(
            clean_timestamp(&FieldValue::from("2023-11-14T22:13:20Z")),
            Some(1_700_000_000)
        );
        assert_eq!(
            clean_timestamp(&FieldValue::from("2023-11-14 22:13:20.123")),
            Some(1_700_000_000)
        );
        assert_eq!(clean_timestamp(&FieldValue::from("yesterday")), None);
        assert_eq!(clean_timestamp(&FieldValue::Null), None);
    }

    #[test]
    fn test_clean_bool() {
        assert_eq!(clean_bool(&FieldValue::from("TRUE")), Some(true));
        assert_eq!(clean_bool(&FieldValue::from(0_i64)), Some(false));
        assert_eq!(clean_bool(&FieldValue::from("maybe")), None);
    }
}
