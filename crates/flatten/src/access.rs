//! Shared keyspace algorithms
//!
//! The pieces both view types need: type-marker dispatch, subtree purge,
//! length-cache reads and writes, child enumeration, and recursive value
//! insertion. Each picks the ordered algorithm when the store supports
//! `key_after` and a full scan otherwise.

use crate::{MapView, Node, SeqView};
use jotdb_core::{Error, FlatPath, Result, Scalar, Value, SUBTREE_MAX};
use jotdb_store::SharedStore;
use tracing::trace;

/// Resolve the node at `prefix`, if the position is occupied
///
/// Inspects the three type markers. Exactly one may be present; more than
/// one is a store-invariant violation.
pub(crate) fn lookup(store: &SharedStore, prefix: &FlatPath) -> Result<Option<Node>> {
    let value_key = prefix.value()?;
    let dict_key = prefix.dict()?;
    let list_key = prefix.list()?;

    let (has_value, has_dict, has_list) = {
        let guard = store.lock();
        (
            guard.contains(value_key.as_str())?,
            guard.contains(dict_key.as_str())?,
            guard.contains(list_key.as_str())?,
        )
    };

    if [has_value, has_dict, has_list].iter().filter(|m| **m).count() > 1 {
        return Err(Error::corrupt_store(format!(
            "{:?} has more than one type marker",
            prefix.as_str()
        )));
    }

    if has_value {
        let scalar = store.lock().get(value_key.as_str())?.ok_or_else(|| {
            Error::corrupt_store(format!("value key {:?} vanished", value_key.as_str()))
        })?;
        Ok(Some(Node::Scalar(scalar)))
    } else if has_dict {
        Ok(Some(Node::Map(MapView::new(store.clone(), prefix.clone()))))
    } else if has_list {
        Ok(Some(Node::Seq(SeqView::new(store.clone(), prefix.clone()))))
    } else {
        Ok(None)
    }
}

/// Remove every key that starts with `prefix`
///
/// Does not touch the parent's length key; the caller adjusts that.
pub(crate) fn purge(store: &SharedStore, prefix: &str) -> Result<()> {
    let mut guard = store.lock();
    if guard.supports_key_after() {
        if guard.contains(prefix)? {
            guard.delete(prefix)?;
        }
        loop {
            let Some(key) = guard.key_after(prefix)? else {
                break;
            };
            if !key.starts_with(prefix) {
                break;
            }
            guard.delete(&key)?;
        }
    } else {
        for key in guard.keys()? {
            if key.starts_with(prefix) {
                guard.delete(&key)?;
            }
        }
    }
    trace!(target: "jotdb::flatten", prefix, "purged subtree");
    Ok(())
}

/// Read the cached cardinality at `prefix`, defaulting to 0 when absent
pub(crate) fn read_len(store: &SharedStore, prefix: &FlatPath) -> Result<usize> {
    let length_key = prefix.length()?;
    match store.lock().get(length_key.as_str())? {
        None => Ok(0),
        Some(Scalar::Int(n)) if n >= 0 => Ok(n as usize),
        Some(other) => Err(Error::corrupt_store(format!(
            "length key {:?} holds {} instead of a count",
            length_key.as_str(),
            other.type_name()
        ))),
    }
}

/// Write the cached cardinality at `prefix`
pub(crate) fn write_len(store: &SharedStore, prefix: &FlatPath, len: usize) -> Result<()> {
    let length_key = prefix.length()?;
    store
        .lock()
        .put(length_key.as_str(), Scalar::Int(len as i64))
}

/// Enumerate the direct child keys of the mapping at `prefix`
///
/// With `key_after` this walks the keyspace in order, visiting each child
/// once: the first key after `prefix + "."` belongs to the smallest child
/// (its type or length marker sorts before the whole subtree), and
/// `key_after(child + SUBTREE_MAX)` skips everything below it. Without
/// `key_after` it scans all keys and keeps the ones whose parent is
/// `prefix`.
pub(crate) fn child_keys(store: &SharedStore, prefix: &FlatPath) -> Result<Vec<String>> {
    let guard = store.lock();
    if guard.supports_key_after() {
        let start = prefix.dict()?;
        let mut keys = Vec::new();
        let mut cursor = guard.key_after(start.as_str())?;
        while let Some(key) = cursor {
            if !key.starts_with(start.as_str()) {
                break;
            }
            let found = FlatPath::from_encoded(key.as_str());
            if !found.kind()?.is_marker() {
                return Err(Error::corrupt_store(format!(
                    "stored key {:?} has no terminator",
                    key
                )));
            }
            let child = found.prefix()?;
            keys.push(child.key_string()?);
            cursor = guard.key_after(&format!("{}{}", child.as_str(), SUBTREE_MAX))?;
        }
        Ok(keys)
    } else {
        let mut keys = Vec::new();
        for key in guard.keys()? {
            let child = FlatPath::from_encoded(key.as_str()).prefix()?;
            match child.parent() {
                Ok(parent) if parent == *prefix => keys.push(child.key_string()?),
                Ok(_) => {}
                Err(Error::RootNode) => {}
                Err(e) => return Err(e),
            }
        }
        // a container child appears once per stored marker; collapse
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Write `value` at the unoccupied position `prefix`
///
/// Scalars land under the value key; containers write their type marker
/// and then insert children through a child view, so nested lengths and
/// markers are maintained by the same code paths as caller-level writes.
pub(crate) fn write_value(store: &SharedStore, prefix: &FlatPath, value: &Value) -> Result<()> {
    match value {
        Value::Map(entries) => {
            store
                .lock()
                .put(prefix.dict()?.as_str(), Scalar::Bool(true))?;
            let child = MapView::new(store.clone(), prefix.clone());
            for (key, entry) in entries {
                child.set(key, entry)?;
            }
            Ok(())
        }
        Value::Seq(items) => {
            store
                .lock()
                .put(prefix.list()?.as_str(), Scalar::Bool(true))?;
            let child = SeqView::new(store.clone(), prefix.clone());
            for item in items {
                child.push(item)?;
            }
            Ok(())
        }
        leaf => {
            let scalar = leaf
                .as_scalar()
                .ok_or_else(|| Error::value_rejected(leaf.type_name().to_string()))?;
            store.lock().put(prefix.value()?.as_str(), scalar)
        }
    }
}

/// Error for an access through a view whose position no longer exists
pub(crate) fn stale(prefix: &FlatPath) -> Error {
    match prefix.key_string() {
        Ok(key) => Error::KeyMissing(key),
        Err(_) => Error::KeyMissing(prefix.as_str().to_string()),
    }
}
