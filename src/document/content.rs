//! A single file's CRDT content document.
//!
//! Content is a flat map of top-level fields (mirrors `workspace_doc.rs`'s
//! `get_file`/`set_file` pair, generalized from a
//! single JSON blob to per-field CRDT slots). Each top-level field is
//! either:
//!
//! - a real `TextRef`, if the field's value is [`Value::Text`] — this is
//!   the only representation that supports `spliceText`'s collaborative,
//!   character-level merge;
//! - otherwise an `Any`, holding the field's value (including any nested
//!   object/array structure) as a single atomic blob.
//!
//! `patchFile` only ever reads and rewrites the one top-level field named
//! by the patch's field path, so concurrent patches to sibling fields never
//! touch each other's CRDT slot and merge independently. Nesting below the
//! top level is resolved by read-modify-write of that one slot (itself
//! last-writer-wins at that finer grain) rather than by building out
//! per-field nested CRDT structure — see `DESIGN.md` for the tradeoff.

use std::collections::HashMap as StdHashMap;
use std::sync::Arc;

use yrs::types::Out;
use yrs::updates::decoder::Decode;
use yrs::{Any, Doc, GetString, Map, MapRef, ReadTxn, StateVector, Text, TextRef, Transact, Update};

use crate::error::{Error, Result};
use crate::value::{FieldPath, PathSegment, Value};

/// A file's structured content, as a CRDT document.
pub struct ContentDoc {
    doc: Doc,
    content: MapRef,
}

impl ContentDoc {
    /// A brand new, empty content document.
    pub fn new() -> Self {
        let doc = Doc::new();
        let content = doc.get_or_insert_map("content");
        Self { doc, content }
    }

    /// Rehydrate from a full state snapshot (as produced by [`Self::encode_state_as_update`]).
    pub fn from_update(bytes: &[u8]) -> Result<Self> {
        let mut this = Self::new();
        this.apply_update(bytes)?;
        Ok(this)
    }

    /// Apply a (full or incremental) binary update, e.g. received from a peer
    /// or loaded from storage.
    pub fn apply_update(&mut self, bytes: &[u8]) -> Result<()> {
        let update = Update::decode_v1(bytes)
            .map_err(|e| Error::CorruptedDocument(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| Error::CorruptedDocument(e.to_string()))?;
        Ok(())
    }

    /// Current state vector, for computing what a peer still needs.
    pub fn state_vector(&self) -> StateVector {
        self.doc.transact().state_vector()
    }

    /// Encode every update since `since` (pass `StateVector::default()` for
    /// the full document).
    pub fn encode_state_as_update(&self, since: &StateVector) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(since)
    }

    /// Read the whole content object as a [`Value::Object`].
    pub fn read(&self) -> Value {
        let txn = self.doc.transact();
        let mut map = indexmap::IndexMap::new();
        for (key, out) in self.content.iter(&txn) {
            map.insert(key.to_string(), out_to_value(&out, &txn));
        }
        Value::Object(map)
    }

    /// Read a single top-level field.
    pub fn get_field(&self, key: &str) -> Option<Value> {
        let txn = self.doc.transact();
        self.content.get(&txn, key).map(|out| out_to_value(&out, &txn))
    }

    /// Replace the whole content object (`updateFile`'s whole-value path).
    /// Captures the delta produced by this mutation.
    pub fn replace_all(&mut self, value: &Value) -> Result<Vec<u8>> {
        let Value::Object(fields) = value else {
            return Err(Error::InvalidChange("file content must be an object".into()));
        };
        let sv_before = self.state_vector();
        {
            let mut txn = self.doc.transact_mut();
            let existing_keys: Vec<String> =
                self.content.iter(&txn).map(|(k, _)| k.to_string()).collect();
            for key in existing_keys {
                self.content.remove(&mut txn, &key);
            }
            for (key, v) in fields {
                insert_field(&mut txn, &self.content, key, v);
            }
        }
        Ok(self.encode_state_as_update(&sv_before))
    }

    /// Apply a structural patch at `field_path` (`patchFile`). Returns
    /// whether the addressed location already held a value, and the delta
    /// produced.
    pub fn patch(&mut self, field_path: &FieldPath, value: Value) -> Result<(bool, Vec<u8>)> {
        let Some((PathSegment::ObjectKey(key0), rest)) = field_path.split_first() else {
            return Err(Error::InvalidChange(
                "patch field path must start with an object key".into(),
            ));
        };

        let sv_before = self.state_vector();
        let existed;
        {
            let mut txn = self.doc.transact_mut();
            let current = self.content.get(&txn, key0.as_str()).map(|out| out_to_value(&out, &txn));
            existed = current.is_some();

            let new_value = if rest.is_empty() {
                value
            } else {
                let mut nested = current.unwrap_or(Value::Null);
                set_path(&mut nested, rest, value)?;
                nested
            };

            self.content.remove(&mut txn, key0.as_str());
            insert_field(&mut txn, &self.content, key0.clone(), new_value);
        }
        Ok((existed, self.encode_state_as_update(&sv_before)))
    }

    /// Splice a text leaf at `field_path` (`spliceText`). `start`/`delete_count`
    /// are in Unicode scalar units. Auto-vivifies an empty text leaf if the
    /// field is absent. Returns whether the field already existed as text,
    /// and the delta produced.
    pub fn splice_text(
        &mut self,
        field_path: &FieldPath,
        start: usize,
        delete_count: usize,
        insert: &str,
    ) -> Result<(bool, Vec<u8>)> {
        let [PathSegment::ObjectKey(key0)] = field_path.as_slice() else {
            return Err(Error::InvalidChange(
                "spliceText only supports a single top-level text field".into(),
            ));
        };

        let sv_before = self.state_vector();
        let existed;
        {
            let txn = self.doc.transact();
            existed = matches!(self.content.get(&txn, key0.as_str()), Some(Out::YText(_)));
        }
        let existed_non_text = {
            let txn = self.doc.transact();
            matches!(self.content.get(&txn, key0.as_str()), Some(out) if !matches!(out, Out::YText(_)))
        };
        if existed_non_text {
            return Err(Error::InvalidChange(format!(
                "field {key0:?} is not a text leaf"
            )));
        }

        {
            let mut txn = self.doc.transact_mut();
            let text_ref: TextRef = if existed {
                match self.content.get(&txn, key0.as_str()) {
                    Some(Out::YText(t)) => t,
                    _ => unreachable!("checked above"),
                }
            } else {
                self.content
                    .insert(&mut txn, key0.as_str(), yrs::TextPrelim::new(""))
            };

            let current = text_ref.get_string(&txn);
            let scalar_len = crate::text_index::scalar_len(&current);
            if start > scalar_len || start + delete_count > scalar_len {
                return Err(Error::IndexOutOfRange {
                    start,
                    delete_count,
                    len: scalar_len,
                });
            }

            let utf16_start = crate::text_index::scalar_to_utf16_offset(&current, start);
            if delete_count > 0 {
                let utf16_len =
                    crate::text_index::scalar_len_to_utf16_len(&current, start, delete_count);
                text_ref.remove_range(&mut txn, utf16_start, utf16_len);
            }
            if !insert.is_empty() {
                text_ref.insert(&mut txn, utf16_start, insert);
            }
        }
        Ok((existed, self.encode_state_as_update(&sv_before)))
    }
}

impl Default for ContentDoc {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_field(txn: &mut yrs::TransactionMut, map: &MapRef, key: String, value: Value) {
    match value {
        Value::Text(s) => {
            map.insert(txn, key, yrs::TextPrelim::new(s));
        }
        other => {
            map.insert(txn, key, value_to_any(&other));
        }
    }
}

fn out_to_value<T: ReadTxn>(out: &Out, txn: &T) -> Value {
    match out {
        Out::Any(any) => any_to_value(any),
        Out::YText(text) => Value::Text(text.get_string(txn)),
        Out::YMap(map) => {
            let mut fields = indexmap::IndexMap::new();
            for (k, v) in map.iter(txn) {
                fields.insert(k.to_string(), out_to_value(&v, txn));
            }
            Value::Object(fields)
        }
        Out::YArray(arr) => Value::Array(arr.iter(txn).map(|v| out_to_value(&v, txn)).collect()),
        _ => Value::Null,
    }
}

fn any_to_value(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => Value::Number(*n),
        Any::BigInt(n) => Value::Number(*n as f64),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(_) => Value::Null,
        Any::Array(items) => Value::Array(items.iter().map(any_to_value).collect()),
        Any::Map(map) => {
            let mut fields = indexmap::IndexMap::new();
            for (k, v) in map.iter() {
                fields.insert(k.clone(), any_to_value(v));
            }
            Value::Object(fields)
        }
    }
}

fn value_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => Any::Number(*n),
        Value::String(s) | Value::Text(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => Any::Array(items.iter().map(value_to_any).collect()),
        Value::Object(map) => {
            let mut out: StdHashMap<String, Any> = StdHashMap::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), value_to_any(v));
            }
            Any::Map(Arc::new(out))
        }
    }
}

/// Navigate `value` following `path`, creating intermediate objects for
/// missing `ObjectKey` segments and extending arrays (padding with `Null`)
/// for out-of-range `ArrayIndex` segments, and set the leaf to `new_leaf`.
fn set_path(value: &mut Value, path: &[PathSegment], new_leaf: Value) -> Result<()> {
    let Some((head, rest)) = path.split_first() else {
        *value = new_leaf;
        return Ok(());
    };

    match head {
        PathSegment::ObjectKey(key) => {
            if !matches!(value, Value::Object(_)) {
                *value = Value::empty_object();
            }
            let Value::Object(map) = value else {
                unreachable!()
            };
            let slot = map.entry(key.clone()).or_insert(Value::Null);
            set_path(slot, rest, new_leaf)
        }
        PathSegment::ArrayIndex(idx) => {
            if !matches!(value, Value::Array(_)) {
                *value = Value::Array(Vec::new());
            }
            let Value::Array(items) = value else {
                unreachable!()
            };
            if *idx >= items.len() {
                items.resize(idx + 1, Value::Null);
            }
            set_path(&mut items[*idx], rest, new_leaf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PathSegment::ObjectKey;

    #[test]
    fn replace_all_round_trips() {
        let mut doc = ContentDoc::new();
        let mut obj = indexmap::IndexMap::new();
        obj.insert("title".to_string(), Value::String("hi".into()));
        obj.insert("body".to_string(), Value::Text("hello".into()));
        doc.replace_all(&Value::Object(obj)).unwrap();

        assert_eq!(doc.get_field("title"), Some(Value::String("hi".into())));
        assert_eq!(doc.get_field("body"), Some(Value::Text("hello".into())));
    }

    #[test]
    fn patch_only_touches_its_own_field() {
        let mut doc = ContentDoc::new();
        let mut obj = indexmap::IndexMap::new();
        obj.insert("a".to_string(), Value::Number(1.0));
        obj.insert("b".to_string(), Value::Number(2.0));
        doc.replace_all(&Value::Object(obj)).unwrap();

        let (existed, _) = doc.patch(&vec![ObjectKey("a".into())], Value::Number(9.0)).unwrap();
        assert!(existed);
        assert_eq!(doc.get_field("a"), Some(Value::Number(9.0)));
        assert_eq!(doc.get_field("b"), Some(Value::Number(2.0)));
    }

    #[test]
    fn patch_auto_vivifies_missing_field() {
        let mut doc = ContentDoc::new();
        let (existed, _) = doc
            .patch(&vec![ObjectKey("tags".into())], Value::Array(vec![Value::Number(1.0)]))
            .unwrap();
        assert!(!existed);
        assert_eq!(doc.get_field("tags"), Some(Value::Array(vec![Value::Number(1.0)])));
    }

    #[test]
    fn splice_text_inserts_and_deletes() {
        let mut doc = ContentDoc::new();
        doc.splice_text(&vec![ObjectKey("body".into())], 0, 0, "Hello").unwrap();
        doc.splice_text(&vec![ObjectKey("body".into())], 5, 0, " World").unwrap();
        assert_eq!(doc.get_field("body"), Some(Value::Text("Hello World".into())));

        doc.splice_text(&vec![ObjectKey("body".into())], 0, 6, "").unwrap();
        assert_eq!(doc.get_field("body"), Some(Value::Text("World".into())));
    }

    #[test]
    fn splice_text_rejects_out_of_range() {
        let mut doc = ContentDoc::new();
        doc.splice_text(&vec![ObjectKey("body".into())], 0, 0, "hi").unwrap();
        assert!(doc.splice_text(&vec![ObjectKey("body".into())], 10, 0, "x").is_err());
    }

    #[test]
    fn concurrent_edits_to_sibling_fields_both_survive() {
        let mut a = ContentDoc::new();
        let mut obj = indexmap::IndexMap::new();
        obj.insert("x".to_string(), Value::Number(1.0));
        obj.insert("y".to_string(), Value::Number(1.0));
        a.replace_all(&Value::Object(obj)).unwrap();

        let snapshot = a.encode_state_as_update(&StateVector::default());
        let mut b = ContentDoc::from_update(&snapshot).unwrap();

        let (_, delta_a) = a.patch(&vec![ObjectKey("x".into())], Value::Number(2.0)).unwrap();
        let (_, delta_b) = b.patch(&vec![ObjectKey("y".into())], Value::Number(3.0)).unwrap();

        a.apply_update(&delta_b).unwrap();
        b.apply_update(&delta_a).unwrap();

        assert_eq!(a.get_field("x"), Some(Value::Number(2.0)));
        assert_eq!(a.get_field("y"), Some(Value::Number(3.0)));
        assert_eq!(b.get_field("x"), Some(Value::Number(2.0)));
        assert_eq!(b.get_field("y"), Some(Value::Number(3.0)));
    }
}
