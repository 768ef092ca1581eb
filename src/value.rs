//! Typed JSON-like value used for file content.
//!
//! The source system stores untyped JSON everywhere; content here is
//! instead represented with a tagged sum over
//! `Null | Bool | Number | String | Array | Object`, plus a `Text` leaf
//! distinguished from `String`: a `Text` leaf is materialized as a real
//! CRDT text sequence (supports [`crate::vfs::ops`]'s `spliceText`), while a
//! `String` leaf is an atomic, wholesale-replaced scalar. The distinction is
//! internal only — both round-trip to a JSON string on export, since JSON
//! cannot express it.

use indexmap::IndexMap;
use serde_json::Number as JsonNumber;

/// A single segment of a field path into a document's content.
///
/// Field paths address a location within the content tree for `patchFile`
/// and `spliceText`: an `ObjectKey` walks into an object field, an
/// `ArrayIndex` walks into an array element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A key within a JSON object.
    ObjectKey(String),
    /// An index within a JSON array.
    ArrayIndex(usize),
}

/// A field path: a sequence of [`PathSegment`]s from the document's content root.
pub type FieldPath = Vec<PathSegment>;

/// A typed JSON-like value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number, represented as `f64` (matches `serde_json`'s default
    /// numeric widening for values read back out of a CRDT map).
    Number(f64),
    /// An atomic, wholesale-replaced string scalar.
    String(String),
    /// A text leaf backed by a CRDT text sequence; supports `spliceText`.
    Text(String),
    /// A JSON array.
    Array(Vec<Value>),
    /// A JSON object. Order-preserving, since display/export should be
    /// deterministic (the bundle codec in particular requires determinism).
    Object(IndexMap<String, Value>),
}

impl Value {
    /// Construct an empty object.
    pub fn empty_object() -> Self {
        Value::Object(IndexMap::new())
    }

    /// The JSON type tag this value would serialize under, for error
    /// messages and the `type` discriminator check in the data model.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Convert to a `serde_json::Value`. `Text` leaves become JSON strings;
    /// the CRDT-text-vs-atomic-string distinction does not survive JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => JsonNumber::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) | Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => {
                let mut obj = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
        }
    }

    /// Convert from a `serde_json::Value`. Strings always become `String`
    /// leaves (never `Text`) — callers that want a splice-able text leaf
    /// must construct `Value::Text` explicitly.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => {
                let mut map = IndexMap::with_capacity(obj.len());
                for (k, v) in obj {
                    map.insert(k.clone(), Value::from_json(v));
                }
                Value::Object(map)
            }
        }
    }

    /// Borrow the string contents of a `String` or `Text` leaf.
    pub fn as_text_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}
