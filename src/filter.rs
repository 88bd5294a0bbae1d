//! Structural partial-match filters
//!
//! A filter is a JSON object. A record matches when every supplied key
//! matches:
//! - `_id` compares against the record identifier
//! - a `null` value matches a missing or null field
//! - an object value matches when every nested key matches (partial match)
//! - any other value must be equal; numbers compare by value, so `4`
//!   equals `4.0`

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::record::{Document, Record, ATTACHMENTS_KEY, ID_KEY};

/// Partial-match query over records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Document);

impl Filter {
    /// Filter matching every record
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on the record identifier
    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().eq(ID_KEY, id.into())
    }

    /// Adds an equality condition
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Sets a condition in place
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Removes a condition
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The `_id` condition, if it is a string
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_KEY).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_document(&self) -> &Document {
        &self.0
    }

    pub fn into_document(self) -> Document {
        self.0
    }

    /// Canonical serialized form, used to key per-query locks
    pub fn fingerprint(&self) -> String {
        // serde_json maps are ordered by key, so equal filters serialize equally
        Value::Object(self.0.clone()).to_string()
    }

    /// Checks whether a record matches every condition
    pub fn matches(&self, record: &Record) -> bool {
        self.0.iter().all(|(key, expected)| match key.as_str() {
            ID_KEY => expected.as_str() == Some(record.id.as_str()),
            ATTACHMENTS_KEY => serde_json::to_value(&record.attachments)
                .map(|actual| &actual == expected)
                .unwrap_or(false),
            _ => match record.fields.get(key) {
                None | Some(Value::Null) => expected.is_null(),
                Some(actual) => value_matches(actual, expected),
            },
        })
    }
}

impl From<Document> for Filter {
    fn from(doc: Document) -> Self {
        Self(doc)
    }
}

impl TryFrom<Value> for Filter {
    type Error = Value;

    /// Only JSON objects are filters; anything else is handed back
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

fn value_matches(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => {
            expected.iter().all(|(key, expected)| {
                actual
                    .get(key)
                    .is_some_and(|actual| value_matches(actual, expected))
            })
        }
        _ => values_equal(actual, expected),
    }
}

/// Exact comparison, except numbers compare by value
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => canonical_number(a) == canonical_number(b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, a)| b.get(key).is_some_and(|b| values_equal(a, b)))
        }
        _ => a == b,
    }
}

/// Integral floats in the `i64` range become integers
fn canonical_number(n: &Number) -> Number {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
            Number::from(f as i64)
        }
        _ => n.clone(),
    }
}

/// `value` with every number in canonical form
///
/// Values that compare equal under `Filter::matches` have the same
/// canonical form, so its serialization can key unique indexes.
pub(crate) fn canonical(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(canonical_number(n)),
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), canonical(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: Value) -> Record {
        Record::new("r1", fields.as_object().cloned().unwrap())
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::new().matches(&record(json!({"a": 1}))));
    }

    #[test]
    fn test_equality_per_field() {
        let r = record(json!({"name": "Cedric", "age": 30}));
        assert!(Filter::new().eq("name", "Cedric").matches(&r));
        assert!(!Filter::new().eq("name", "Marcel").matches(&r));
        assert!(Filter::new().eq("name", "Cedric").eq("age", 30).matches(&r));
        assert!(!Filter::new().eq("name", "Cedric").eq("age", 31).matches(&r));
    }

    #[test]
    fn test_id_condition() {
        let r = record(json!({"a": 1}));
        assert!(Filter::by_id("r1").matches(&r));
        assert!(!Filter::by_id("r2").matches(&r));
    }

    #[test]
    fn test_null_matches_missing_field() {
        let r = record(json!({"a": 1}));
        assert!(Filter::new().eq("b", Value::Null).matches(&r));
        assert!(!Filter::new().eq("a", Value::Null).matches(&r));
    }

    #[test]
    fn test_nested_object_partial_match() {
        let r = record(json!({"address": {"city": "Paris", "zip": "75001"}}));
        assert!(Filter::new().eq("address", json!({"city": "Paris"})).matches(&r));
        assert!(!Filter::new().eq("address", json!({"city": "Lyon"})).matches(&r));
        assert!(!Filter::new().eq("address", json!({"country": "FR"})).matches(&r));
    }

    #[test]
    fn test_arrays_compare_exactly() {
        let r = record(json!({"tags": ["a", "b"]}));
        assert!(Filter::new().eq("tags", json!(["a", "b"])).matches(&r));
        assert!(!Filter::new().eq("tags", json!(["a"])).matches(&r));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let r = record(json!({"n": 4.0, "tags": [1, 2.0], "pos": {"x": 3}}));
        assert!(Filter::new().eq("n", 4).matches(&r));
        assert!(Filter::new().eq("tags", json!([1.0, 2])).matches(&r));
        assert!(Filter::new().eq("pos", json!({"x": 3.0})).matches(&r));
        assert!(!Filter::new().eq("n", 4.5).matches(&r));

        let r = record(json!({"n": 4}));
        assert!(Filter::new().eq("n", 4.0).matches(&r));
    }

    #[test]
    fn test_canonical_numbers() {
        assert_eq!(canonical(&json!(4.0)).to_string(), canonical(&json!(4)).to_string());
        assert_eq!(canonical(&json!({"a": [-2.0]})), json!({"a": [-2]}));
        assert_eq!(canonical(&json!(4.5)), json!(4.5));
    }

    #[test]
    fn test_fingerprint_ignores_insertion_order() {
        let a = Filter::new().eq("x", 1).eq("y", 2);
        let b = Filter::new().eq("y", 2).eq("x", 1);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_try_from_rejects_non_objects() {
        assert!(Filter::try_from(json!({"a": 1})).is_ok());
        assert!(Filter::try_from(json!([1, 2])).is_err());
    }
}
