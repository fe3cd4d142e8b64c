//! A JSON/BSON-agnostic document value.
//!
//! The websocket permission token arrives as JSON (embedded in the MQTT
//! username); the matching account record comes from a document store that,
//! in production, speaks BSON. Rather than have the permission evaluator
//! depend on `serde_json::Value` and quietly assume every document it is
//! ever handed came from JSON, both sources are normalized into this single
//! tagged type before anything compares them structurally.

use std::collections::BTreeMap;

/// A structurally comparable document value, independent of its source
/// encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Document>),
    Object(BTreeMap<String, Document>),
}

impl Document {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Document::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Document::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Document::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Document]> {
        match self {
            Document::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Field lookup on an object; `None` for anything else, including a
    /// field that is present but holds `Document::Null`, so callers can
    /// treat "absent" and "explicitly null" identically (both the JWT
    /// payload and the account documents use absence to mean "no
    /// constraint").
    pub fn get(&self, field: &str) -> Option<&Document> {
        match self {
            Document::Object(map) => map.get(field).filter(|v| !matches!(v, Document::Null)),
            _ => None,
        }
    }

    /// Whether every element of `self` (an array) is equal, as a string, to
    /// at least a prefix relationship with `needle` — i.e. whether any
    /// element of this array is a string that is a prefix of `needle`.
    pub fn any_str_is_prefix_of(&self, needle: &str) -> bool {
        match self.as_array() {
            Some(items) => items
                .iter()
                .filter_map(Document::as_str)
                .any(|candidate| needle.starts_with(candidate)),
            None => false,
        }
    }
}

impl From<serde_json::Value> for Document {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Document::Null,
            serde_json::Value::Bool(b) => Document::Bool(b),
            serde_json::Value::Number(n) => Document::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Document::String(s),
            serde_json::Value::Array(items) => Document::Array(items.into_iter().map(Document::from).collect()),
            serde_json::Value::Object(map) => {
                Document::Object(map.into_iter().map(|(k, v)| (k, Document::from(v))).collect())
            }
        }
    }
}
