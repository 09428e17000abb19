//! Caller-facing value types
//!
//! [`Entry`] is what reads resolve to: a scalar, or a live reference into
//! the overlay tree ([`MapRef`] / [`SeqRef`]). References stay valid
//! across commits — their state lives in the store — and mutations
//! through them buffer in the overlay like any other write.
//!
//! [`Datum`] is what writes accept: plain values (anything `Into<Value>`,
//! including `serde_json::Value`) or an entry read from the document.
//! Writing an entry back to its own position is a no-op; writing it
//! anywhere else behaves as a deep copy.

use crate::overlay::{Doc, Incoming, NodeId, Resolved};
use jotdb_core::{Error, Result, Scalar, Value};
use std::fmt;
use std::sync::Arc;

/// A resolved child of the document
#[derive(Debug, Clone)]
pub enum Entry {
    /// Null leaf
    Null,
    /// Boolean leaf
    Bool(bool),
    /// Integer leaf
    Int(i64),
    /// Float leaf
    Float(f64),
    /// String leaf
    Text(String),
    /// Nested mapping
    Map(MapRef),
    /// Nested sequence
    Seq(SeqRef),
}

impl Entry {
    pub(crate) fn from_resolved(doc: &Doc, resolved: Resolved) -> Entry {
        match resolved {
            Resolved::Scalar(Scalar::Null) => Entry::Null,
            Resolved::Scalar(Scalar::Bool(b)) => Entry::Bool(b),
            Resolved::Scalar(Scalar::Int(n)) => Entry::Int(n),
            Resolved::Scalar(Scalar::Float(x)) => Entry::Float(x),
            Resolved::Scalar(Scalar::Text(s)) => Entry::Text(s),
            Resolved::Map(id) => Entry::Map(MapRef {
                doc: doc.clone(),
                id,
            }),
            Resolved::Seq(id) => Entry::Seq(SeqRef {
                doc: doc.clone(),
                id,
            }),
        }
    }

    /// The nested mapping, if this entry is one
    pub fn as_map(&self) -> Option<&MapRef> {
        match self {
            Entry::Map(map) => Some(map),
            _ => None,
        }
    }

    /// The nested sequence, if this entry is one
    pub fn as_seq(&self) -> Option<&SeqRef> {
        match self {
            Entry::Seq(seq) => Some(seq),
            _ => None,
        }
    }

    /// The scalar contents, if this entry is a leaf
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Entry::Null => Some(Scalar::Null),
            Entry::Bool(b) => Some(Scalar::Bool(*b)),
            Entry::Int(n) => Some(Scalar::Int(*n)),
            Entry::Float(x) => Some(Scalar::Float(*x)),
            Entry::Text(s) => Some(Scalar::Text(s.clone())),
            Entry::Map(_) | Entry::Seq(_) => None,
        }
    }

    /// Integer contents, if this entry is an integer leaf
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Entry::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// String contents, if this entry is a string leaf
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Entry::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Materialize into a plain value tree, reflecting uncommitted
    /// overlay state
    pub fn to_value(&self) -> Result<Value> {
        match self {
            Entry::Map(map) => map.export(),
            Entry::Seq(seq) => seq.export(),
            leaf => match leaf.as_scalar() {
                Some(scalar) => Ok(Value::from(scalar)),
                None => Err(Error::value_rejected("unresolvable entry".to_string())),
            },
        }
    }
}

/// A live reference to a mapping inside the document
#[derive(Clone)]
pub struct MapRef {
    pub(crate) doc: Doc,
    pub(crate) id: NodeId,
}

impl fmt::Debug for MapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<MapRef node={}>", self.id)
    }
}

impl MapRef {
    /// Resolve the child under `key`
    pub fn get(&self, key: &str) -> Result<Entry> {
        let resolved = self.doc.lock().map_get(self.id, key)?;
        Ok(Entry::from_resolved(&self.doc, resolved))
    }

    /// Assign `value` under `key`
    pub fn set(&self, key: &str, value: impl Into<Datum>) -> Result<()> {
        let incoming = prepare(&self.doc, value.into())?;
        self.doc.lock().map_set(self.id, key, incoming)
    }

    /// Delete the child under `key`
    pub fn delete(&self, key: &str) -> Result<()> {
        self.doc.lock().map_delete(self.id, key)
    }

    /// True when `key` resolves
    pub fn contains(&self, key: &str) -> Result<bool> {
        self.doc.lock().map_contains(self.id, key)
    }

    /// The keys of the direct children
    pub fn keys(&self) -> Result<Vec<String>> {
        self.doc.lock().map_keys(self.id)
    }

    /// Number of children
    pub fn len(&self) -> Result<usize> {
        self.doc.lock().map_len(self.id)
    }

    /// True when the mapping holds no keys
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Materialize the mapping, reflecting uncommitted overlay state
    pub fn export(&self) -> Result<Value> {
        self.doc.lock().export_map(self.id)
    }

    /// Flush buffered mutations into the store
    ///
    /// Only the document root commits; calling this on a nested mapping
    /// fails with [`Error::NotTopLevel`].
    pub fn commit(&self) -> Result<()> {
        let mut doc = self.doc.lock();
        if !doc.is_root(self.id)? {
            return Err(Error::NotTopLevel);
        }
        doc.commit()
    }

    /// Discard buffered mutations
    ///
    /// Root-only, like [`MapRef::commit`].
    pub fn rollback(&self) -> Result<()> {
        let mut doc = self.doc.lock();
        if !doc.is_root(self.id)? {
            return Err(Error::NotTopLevel);
        }
        doc.rollback()
    }
}

/// A live reference to a sequence inside the document
#[derive(Clone)]
pub struct SeqRef {
    pub(crate) doc: Doc,
    pub(crate) id: NodeId,
}

impl fmt::Debug for SeqRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<SeqRef node={}>", self.id)
    }
}

impl SeqRef {
    /// Resolve the element at `index` (negative counts from the end)
    pub fn get(&self, index: i64) -> Result<Entry> {
        let resolved = self.doc.lock().seq_get(self.id, index)?;
        Ok(Entry::from_resolved(&self.doc, resolved))
    }

    /// Replace the element at `index`
    pub fn set(&self, index: i64, value: impl Into<Datum>) -> Result<()> {
        let incoming = prepare(&self.doc, value.into())?;
        self.doc.lock().seq_set(self.id, index, incoming)
    }

    /// Insert `value` before position `pos`
    ///
    /// Positions are clamped: negative counts from the end, anything
    /// past the end appends.
    pub fn insert(&self, pos: i64, value: impl Into<Datum>) -> Result<()> {
        let incoming = prepare(&self.doc, value.into())?;
        self.doc.lock().seq_insert(self.id, pos, incoming)
    }

    /// Append `value` at the end
    pub fn push(&self, value: impl Into<Datum>) -> Result<()> {
        let incoming = prepare(&self.doc, value.into())?;
        let mut doc = self.doc.lock();
        let len = doc.seq_len(self.id)?;
        doc.seq_insert(self.id, len as i64, incoming)
    }

    /// Remove the element at `index`, shifting later elements down
    pub fn delete(&self, index: i64) -> Result<()> {
        self.doc.lock().seq_delete(self.id, index)
    }

    /// Remove and return the last element
    pub fn pop(&self) -> Result<Entry> {
        let resolved = self.doc.lock().seq_pop(self.id)?;
        Ok(Entry::from_resolved(&self.doc, resolved))
    }

    /// Number of elements
    pub fn len(&self) -> Result<usize> {
        self.doc.lock().seq_len(self.id)
    }

    /// True when the sequence holds no elements
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Resolve every element in order
    pub fn items(&self) -> Result<Vec<Entry>> {
        let len = self.len()?;
        let mut entries = Vec::with_capacity(len);
        for i in 0..len {
            entries.push(self.get(i as i64)?);
        }
        Ok(entries)
    }

    /// Replace the whole sequence with `items`
    ///
    /// Accepts the same inputs as the other mutators: plain values or
    /// entries read from a document, including elements of this very
    /// sequence (they are copied out before the replacement lands).
    pub fn assign(&self, items: Vec<impl Into<Datum>>) -> Result<()> {
        let mut incoming = Vec::with_capacity(items.len());
        for item in items {
            incoming.push(prepare(&self.doc, item.into())?);
        }
        self.doc.lock().seq_assign(self.id, incoming)
    }

    /// Materialize the sequence, reflecting uncommitted overlay state
    pub fn export(&self) -> Result<Value> {
        self.doc.lock().export_seq(self.id)
    }
}

/// A value being written into the document
#[derive(Debug, Clone)]
pub enum Datum {
    /// Plain data, inserted as given
    Value(Value),
    /// A mapping read from a document
    Map(MapRef),
    /// A sequence read from a document
    Seq(SeqRef),
}

/// Normalize a datum against the document receiving the write: entries
/// of the same document stay references (copied at commit), entries of a
/// different document are materialized immediately.
pub(crate) fn prepare(doc: &Doc, datum: Datum) -> Result<Incoming> {
    match datum {
        Datum::Value(value) => Ok(Incoming::Value(value)),
        Datum::Map(map) => {
            if Arc::ptr_eq(&map.doc, doc) {
                Ok(Incoming::Existing(map.id))
            } else {
                Ok(Incoming::Value(map.export()?))
            }
        }
        Datum::Seq(seq) => {
            if Arc::ptr_eq(&seq.doc, doc) {
                Ok(Incoming::Existing(seq.id))
            } else {
                Ok(Incoming::Value(seq.export()?))
            }
        }
    }
}

impl From<Value> for Datum {
    fn from(v: Value) -> Self {
        Datum::Value(v)
    }
}

impl From<Scalar> for Datum {
    fn from(s: Scalar) -> Self {
        Datum::Value(Value::from(s))
    }
}

impl From<MapRef> for Datum {
    fn from(map: MapRef) -> Self {
        Datum::Map(map)
    }
}

impl From<SeqRef> for Datum {
    fn from(seq: SeqRef) -> Self {
        Datum::Seq(seq)
    }
}

impl From<Entry> for Datum {
    fn from(entry: Entry) -> Self {
        match entry {
            Entry::Map(map) => Datum::Map(map),
            Entry::Seq(seq) => Datum::Seq(seq),
            leaf => match leaf.as_scalar() {
                Some(scalar) => Datum::Value(Value::from(scalar)),
                None => Datum::Value(Value::Null),
            },
        }
    }
}

impl From<&Entry> for Datum {
    fn from(entry: &Entry) -> Self {
        Datum::from(entry.clone())
    }
}

impl From<serde_json::Value> for Datum {
    fn from(v: serde_json::Value) -> Self {
        Datum::Value(Value::from(v))
    }
}

impl From<bool> for Datum {
    fn from(b: bool) -> Self {
        Datum::Value(Value::Bool(b))
    }
}

impl From<i64> for Datum {
    fn from(n: i64) -> Self {
        Datum::Value(Value::Int(n))
    }
}

impl From<i32> for Datum {
    fn from(n: i32) -> Self {
        Datum::Value(Value::Int(n as i64))
    }
}

impl From<f64> for Datum {
    fn from(x: f64) -> Self {
        Datum::Value(Value::Float(x))
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Datum::Value(Value::Text(s.to_string()))
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Self {
        Datum::Value(Value::Text(s))
    }
}

impl From<()> for Datum {
    fn from(_: ()) -> Self {
        Datum::Value(Value::Null)
    }
}
