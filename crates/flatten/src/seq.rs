//! Sequence view

use crate::{access, Node};
use jotdb_core::{Error, FlatPath, Result, Scalar, Value};
use jotdb_store::SharedStore;

/// A sequence presented over the flat keyspace at a prefix path
///
/// Children occupy exactly the positions `p[0] .. p[n-1]`; deletion and
/// insertion shift elements to keep the range dense, copying upward on
/// insert so no value is overwritten before it has been moved.
#[derive(Clone)]
pub struct SeqView {
    store: SharedStore,
    path: FlatPath,
}

impl std::fmt::Debug for SeqView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<SeqView path={:?}>", self.path.as_str())
    }
}

impl PartialEq for SeqView {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl SeqView {
    /// View the sequence at `path`
    pub fn new(store: SharedStore, path: FlatPath) -> Self {
        SeqView { store, path }
    }

    /// The prefix path this view addresses
    pub fn path(&self) -> &FlatPath {
        &self.path
    }

    /// The shared store backing this view
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    fn element_prefix(&self, index: usize) -> Result<FlatPath> {
        self.path.list()?.index(index)
    }

    fn ensure_live(&self) -> Result<()> {
        let marker = self.path.list()?;
        if self.store.lock().contains(marker.as_str())? {
            Ok(())
        } else {
            Err(access::stale(&self.path))
        }
    }

    /// Cached cardinality (0 when the length key is absent)
    pub fn len(&self) -> Result<usize> {
        access::read_len(&self.store, &self.path)
    }

    /// True when the sequence holds no elements
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Map a possibly-negative index into `[0, len)`
    fn normalize(&self, index: i64, len: usize) -> Result<usize> {
        let n = len as i64;
        if index < 0 {
            let shifted = index + n;
            if shifted >= 0 {
                return Ok(shifted as usize);
            }
        } else if index < n {
            return Ok(index as usize);
        }
        Err(Error::IndexOutOfRange { index, len })
    }

    /// Resolve the element at `index` (negative counts from the end)
    pub fn get(&self, index: i64) -> Result<Node> {
        self.ensure_live()?;
        let len = self.len()?;
        let i = self.normalize(index, len)?;
        match access::lookup(&self.store, &self.element_prefix(i)?)? {
            Some(node) => Ok(node),
            None => Err(Error::IndexOutOfRange { index, len }),
        }
    }

    fn export_at(&self, index: usize) -> Result<Value> {
        match access::lookup(&self.store, &self.element_prefix(index)?)? {
            Some(node) => node.to_value(),
            None => Err(Error::IndexOutOfRange {
                index: index as i64,
                len: self.len()?,
            }),
        }
    }

    /// Write `value` at position `index` without a range check; used by
    /// the shifting loops, which address one past the current end.
    fn write_at(&self, index: usize, value: &Value) -> Result<()> {
        let prefix = self.element_prefix(index)?;
        access::purge(&self.store, prefix.as_str())?;
        access::write_value(&self.store, &prefix, value)
    }

    /// Replace the element at `index`; the length does not change
    pub fn set(&self, index: i64, value: &Value) -> Result<()> {
        self.ensure_live()?;
        let len = self.len()?;
        let i = self.normalize(index, len)?;
        self.write_at(i, value)
    }

    /// Assign a resolved node at `index`
    ///
    /// Writing an element back to its own position is a no-op; any other
    /// node is materialized before the destination is purged.
    pub fn set_node(&self, index: i64, node: &Node) -> Result<()> {
        self.ensure_live()?;
        let len = self.len()?;
        let i = self.normalize(index, len)?;
        if let Some(source) = node.path() {
            if *source == self.element_prefix(i)? {
                return Ok(());
            }
        }
        let value = node.to_value()?;
        self.write_at(i, &value)
    }

    /// Insert `value` before position `pos`, shifting later elements up
    ///
    /// `pos` is clamped: negative counts from the end, anything past the
    /// end appends. Elements are copied from the top down so none is
    /// overwritten before it has been moved.
    pub fn insert(&self, pos: i64, value: &Value) -> Result<()> {
        self.ensure_live()?;
        let len = self.len()?;
        let pos = clamp_insert(pos, len);
        access::write_len(&self.store, &self.path, len + 1)?;
        let mut j = len;
        while j > pos {
            let moved = self.export_at(j - 1)?;
            self.write_at(j, &moved)?;
            j -= 1;
        }
        self.write_at(pos, value)
    }

    /// Append `value` at the end
    pub fn push(&self, value: &Value) -> Result<()> {
        self.ensure_live()?;
        let len = self.len()?;
        access::write_len(&self.store, &self.path, len + 1)?;
        self.write_at(len, value)
    }

    /// Remove the element at `index`, shifting later elements down
    pub fn delete(&self, index: i64) -> Result<()> {
        self.ensure_live()?;
        let len = self.len()?;
        let i = self.normalize(index, len)?;
        for j in i..len - 1 {
            let moved = self.export_at(j + 1)?;
            self.write_at(j, &moved)?;
        }
        access::purge(&self.store, self.element_prefix(len - 1)?.as_str())?;
        access::write_len(&self.store, &self.path, len - 1)
    }

    /// Remove and return the last element
    pub fn pop(&self) -> Result<Value> {
        self.ensure_live()?;
        let len = self.len()?;
        if len == 0 {
            return Err(Error::IndexOutOfRange { index: -1, len: 0 });
        }
        let value = self.export_at(len - 1)?;
        access::purge(&self.store, self.element_prefix(len - 1)?.as_str())?;
        access::write_len(&self.store, &self.path, len - 1)?;
        Ok(value)
    }

    /// Replace the whole sequence with `items`
    ///
    /// The one supported form of slice assignment. The old subtree is
    /// purged wholesale and the new elements appended one by one.
    pub fn assign(&self, items: &[Value]) -> Result<()> {
        self.ensure_live()?;
        let marker = self.path.list()?;
        access::purge(&self.store, marker.as_str())?;
        self.store.lock().put(marker.as_str(), Scalar::Bool(true))?;
        access::write_len(&self.store, &self.path, 0)?;
        for item in items {
            self.push(item)?;
        }
        Ok(())
    }

    /// Resolve every element in order
    pub fn items(&self) -> Result<Vec<Node>> {
        self.ensure_live()?;
        let len = self.len()?;
        let mut nodes = Vec::with_capacity(len);
        for i in 0..len {
            nodes.push(self.get(i as i64)?);
        }
        Ok(nodes)
    }

    /// Materialize the whole sequence into a plain value tree
    pub fn export(&self) -> Result<Value> {
        let mut items = Vec::new();
        for node in self.items()? {
            items.push(node.to_value()?);
        }
        Ok(Value::Seq(items))
    }
}

/// Clamp an insertion position: negative counts from the end, anything
/// past the end appends.
fn clamp_insert(pos: i64, len: usize) -> usize {
    if pos < 0 {
        (len as i64 + pos).max(0) as usize
    } else {
        (pos as usize).min(len)
    }
}
