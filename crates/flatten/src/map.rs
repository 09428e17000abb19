//! Mapping view

use crate::{access, Node};
use jotdb_core::{Error, FlatPath, Result, Value};
use jotdb_store::SharedStore;

/// A mapping presented over the flat keyspace at a dict-prefix path
///
/// The root mapping of a document has the empty prefix. All other
/// mappings are reached through [`MapView::get`] / [`crate::SeqView::get`]
/// and exist in the store as a dict marker plus flattened children.
#[derive(Clone)]
pub struct MapView {
    store: SharedStore,
    path: FlatPath,
}

impl std::fmt::Debug for MapView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<MapView path={:?}>", self.path.as_str())
    }
}

impl PartialEq for MapView {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl MapView {
    /// View the mapping at `path`
    pub fn new(store: SharedStore, path: FlatPath) -> Self {
        MapView { store, path }
    }

    /// View the root mapping (empty prefix)
    pub fn root(store: SharedStore) -> Self {
        MapView::new(store, FlatPath::root())
    }

    /// The prefix path this view addresses
    pub fn path(&self) -> &FlatPath {
        &self.path
    }

    /// The shared store backing this view
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    fn child_prefix(&self, key: &str) -> Result<FlatPath> {
        self.path.dict()?.lookup(key)
    }

    /// The root mapping always exists; any other view is valid only while
    /// its dict marker is still in the store.
    fn ensure_live(&self) -> Result<()> {
        if self.path.is_root() {
            return Ok(());
        }
        let marker = self.path.dict()?;
        if self.store.lock().contains(marker.as_str())? {
            Ok(())
        } else {
            Err(access::stale(&self.path))
        }
    }

    /// Resolve the child under `key`
    pub fn get(&self, key: &str) -> Result<Node> {
        self.ensure_live()?;
        let prefix = self.child_prefix(key)?;
        match access::lookup(&self.store, &prefix)? {
            Some(node) => Ok(node),
            None => Err(Error::KeyMissing(key.to_string())),
        }
    }

    /// True when `key` resolves
    pub fn contains(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(Error::KeyMissing(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Cached cardinality (0 when the length key is absent)
    pub fn len(&self) -> Result<usize> {
        access::read_len(&self.store, &self.path)
    }

    /// True when the mapping holds no keys
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Assign `value` under `key`, replacing any existing subtree
    pub fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.ensure_live()?;
        if self.contains(key)? {
            self.delete(key)?;
        }
        let prefix = self.child_prefix(key)?;
        access::write_value(&self.store, &prefix, value)?;
        access::write_len(&self.store, &self.path, self.len()? + 1)
    }

    /// Assign a resolved node under `key`
    ///
    /// Assigning a view back to its own position is a no-op. Any other
    /// view is materialized first, so the copy is taken before the
    /// destination subtree is purged and never aliases the store.
    pub fn set_node(&self, key: &str, node: &Node) -> Result<()> {
        if let Some(source) = node.path() {
            let target = self.child_prefix(key)?;
            if *source == target {
                return Ok(());
            }
        }
        let value = node.to_value()?;
        self.set(key, &value)
    }

    /// Remove the child under `key` and its whole subtree
    pub fn delete(&self, key: &str) -> Result<()> {
        self.ensure_live()?;
        if !self.contains(key)? {
            return Err(Error::KeyMissing(key.to_string()));
        }
        let prefix = self.child_prefix(key)?;
        access::purge(&self.store, prefix.as_str())?;
        access::write_len(&self.store, &self.path, self.len()?.saturating_sub(1))
    }

    /// The keys of the direct children
    ///
    /// In lexicographic order of their encoded prefixes when the store
    /// supports `key_after`; sorted after a full scan otherwise.
    pub fn keys(&self) -> Result<Vec<String>> {
        self.ensure_live()?;
        access::child_keys(&self.store, &self.path)
    }

    /// Materialize the whole mapping into a plain value tree
    pub fn export(&self) -> Result<Value> {
        let mut entries = std::collections::BTreeMap::new();
        for key in self.keys()? {
            entries.insert(key.clone(), self.get(&key)?.to_value()?);
        }
        Ok(Value::Map(entries))
    }
}
