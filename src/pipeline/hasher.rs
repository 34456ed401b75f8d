//! Row hashing for destination deduplication
//!
//! The row hash is the uniqueness key of every processed relation, so its
//! encoding is a compatibility contract: changing anything here makes every
//! previously written row look new.
//!
//! ## Encoding (v1)
//!
//! - Digest: SHA-256 (256 bits), rendered as 64 lowercase hex characters
//! - Input: compact JSON object `{column: value}`, keys sorted lexicographically
//! - Text is whitespace-trimmed, floats use shortest round-trip form
//! - `-0.0` becomes `0.0`, NaN/infinite floats become `null`
//! - `id`, `created_at` and `row_hash` are never part of the input

use super::types::{DestinationRecord, FieldValue, RecordRow};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Length of a rendered row hash
pub const ROW_HASH_HEX_LEN: usize = 64;

/// Columns that can never contribute to a row hash
const RESERVED_COLUMNS: &[&str] = &["id", "created_at", "row_hash"];

fn canonical_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Integer(i) => Value::from(*i),
        FieldValue::Real(f) => {
            if !f.is_finite() {
                Value::Null
            } else if *f == 0.0 {
                Value::from(0.0)
            } else {
                Value::from(*f)
            }
        }
        FieldValue::Text(s) => Value::String(s.trim().to_string()),
        FieldValue::Bool(b) => Value::Bool(*b),
    }
}

/// Canonical JSON text hashed for a set of named fields
pub fn canonical_form<'n, 'v>(
    fields: impl IntoIterator<Item = (&'n str, &'v FieldValue)>,
    excluded: &[&str],
) -> String {
    let sorted: BTreeMap<&str, Value> = fields
        .into_iter()
        .filter(|(name, _)| !RESERVED_COLUMNS.contains(name) && !excluded.contains(name))
        .map(|(name, value)| (name, canonical_value(value)))
        .collect();

    // Insert in key order so the output stays sorted even with preserve_order
    let mut object = Map::new();
    for (name, value) in sorted {
        object.insert(name.to_string(), value);
    }

    Value::Object(object).to_string()
}

/// Hash a set of named fields
pub fn hash_fields<'n, 'v>(
    fields: impl IntoIterator<Item = (&'n str, &'v FieldValue)>,
    excluded: &[&str],
) -> String {
    let canonical = canonical_form(fields, excluded);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash a typed record and package it for insertion
pub fn hash_record<R: DestinationRecord>(record: &R) -> RecordRow {
    let values = record.values();
    let row_hash = hash_fields(
        R::table().column_names().zip(values.iter()),
        R::hash_excluded(),
    );

    RecordRow { values, row_hash }
}
