//! Item keys and the persisted record format
//!
//! Every line of an append log is one [`ProcessedRecord`] serialized as JSON.
//! The record carries its [`Key`] verbatim, so resuming a run only needs to
//! read the `key` field back.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FetchError;

/// One component of a composite key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Null,
    Int(i64),
    Text(String),
}

impl KeyPart {
    /// Normalize a JSON value into a comparable key part.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .unwrap_or_else(|| Self::Text(n.to_string())),
            Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Stable identity of a work item.
///
/// Serialized untagged: a number, a string, or an array of parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Contiguous numeric key space (compound IDs). Supports cursor resume.
    Numeric(u64),
    /// Opaque string identifier (preprint IDs).
    Text(String),
    /// Tuple of named identifier fields, in configured column order.
    Composite(Vec<KeyPart>),
}

impl Key {
    /// Build a composite key from the named fields of a JSON object.
    ///
    /// Missing fields become [`KeyPart::Null`], matching how the same key is
    /// rebuilt from a persisted record.
    pub fn from_fields(fields: &Map<String, Value>, columns: &[String]) -> Self {
        Self::Composite(
            columns
                .iter()
                .map(|c| fields.get(c).map_or(KeyPart::Null, KeyPart::from_value))
                .collect(),
        )
    }

    pub fn as_numeric(&self) -> Option<u64> {
        match self {
            Self::Numeric(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Composite(parts) => {
                f.write_str("(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{part}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// A unit of work produced by an item source.
pub trait WorkItem {
    fn key(&self) -> Key;

    /// Input data worth keeping next to the result (e.g. the source row).
    fn context(&self) -> Option<Value> {
        None
    }
}

/// Result of one successful external call.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub payload: Value,
    /// Filled in by the paced fetcher when the client doesn't report it.
    pub latency: Option<Duration>,
    pub bytes: Option<u64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

impl Fetched {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            latency: None,
            bytes: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

/// Timing, size and error details stored with every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordMeta {
    pub date: Option<DateTime<Utc>>,
    pub latency_ms: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    pub error: Option<String>,
}

/// One line of the append log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub key: Key,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Value>,
    pub payload: Option<Value>,
    #[serde(default)]
    pub meta: RecordMeta,
}

impl ProcessedRecord {
    pub fn success(key: Key, item: Option<Value>, fetched: Fetched, attempts: u32) -> Self {
        let latency_ms = fetched
            .latency
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        Self {
            key,
            item,
            payload: Some(fetched.payload),
            meta: RecordMeta {
                date: Some(Utc::now()),
                latency_ms,
                attempts,
                bytes: fetched.bytes,
                input_tokens: fetched.input_tokens,
                output_tokens: fetched.output_tokens,
                error: None,
            },
        }
    }

    pub fn failure(key: Key, item: Option<Value>, error: &FetchError, attempts: u32) -> Self {
        Self {
            key,
            item,
            payload: None,
            meta: RecordMeta {
                date: Some(Utc::now()),
                attempts,
                error: Some(error.message().to_string()),
                ..Default::default()
            },
        }
    }

    pub fn is_failure(&self) -> bool {
        self.meta.error.is_some()
    }

    /// Field of the stored item context, if any.
    pub fn item_field(&self, name: &str) -> Option<&Value> {
        self.item.as_ref().and_then(|v| v.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_key_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Key::Numeric(42)).unwrap(), "42");
        let back: Key = serde_json::from_str("42").unwrap();
        assert_eq!(back, Key::Numeric(42));
    }

    #[test]
    fn text_key_serializes_as_string() {
        let back: Key = serde_json::from_str("\"60c7\"").unwrap();
        assert_eq!(back, Key::Text("60c7".into()));
    }

    #[test]
    fn composite_key_with_null_parses() {
        let back: Key = serde_json::from_str(r#"["doc-1", 3, null]"#).unwrap();
        assert_eq!(
            back,
            Key::Composite(vec![
                KeyPart::Text("doc-1".into()),
                KeyPart::Int(3),
                KeyPart::Null
            ])
        );
    }

    #[test]
    fn key_from_fields_uses_column_order() {
        let row = json!({"doc": "a", "para": 2, "text": "..."});
        let cols = vec!["para".to_string(), "doc".to_string(), "missing".to_string()];
        let key = Key::from_fields(row.as_object().unwrap(), &cols);
        assert_eq!(
            key,
            Key::Composite(vec![
                KeyPart::Int(2),
                KeyPart::Text("a".into()),
                KeyPart::Null
            ])
        );
        assert_eq!(key.to_string(), "(2, a, null)");
    }

    #[test]
    fn failure_record_has_null_payload() {
        let rec = ProcessedRecord::failure(
            Key::Numeric(5),
            None,
            &FetchError::Permanent("HTTP 404".into()),
            1,
        );
        assert!(rec.is_failure());
        let line = serde_json::to_string(&rec).unwrap();
        assert!(line.contains(r#""payload":null"#));
        assert!(line.contains(r#""error":"HTTP 404""#));
    }

    #[test]
    fn success_record_carries_metrics() {
        let fetched = Fetched::new(json!({"q": "why?"}))
            .with_tokens(10, 4)
            .with_latency(Duration::from_millis(1500));
        let rec = ProcessedRecord::success(Key::Numeric(1), None, fetched, 2);
        assert!(!rec.is_failure());
        assert_eq!(rec.meta.latency_ms, 1500);
        assert_eq!(rec.meta.input_tokens, Some(10));
        assert_eq!(rec.meta.attempts, 2);
    }

    #[test]
    fn record_without_meta_still_parses() {
        let rec: ProcessedRecord = serde_json::from_str(r#"{"key": 9, "payload": {"a": 1}}"#).unwrap();
        assert_eq!(rec.key, Key::Numeric(9));
        assert_eq!(rec.meta, RecordMeta::default());
    }
}
