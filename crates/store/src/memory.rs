//! In-memory store backends
//!
//! [`MemoryStore`] keeps keys in a `BTreeMap` and answers `key_after`
//! with a range query. [`HashStore`] deliberately does not: it exists so
//! tests can exercise the unordered fallback paths of the flattening
//! layer against the same operations.

use crate::store::FlatStore;
use jotdb_core::{Error, Result, Scalar};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Ordered in-memory store with strict-successor support
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, Scalar>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }
}

impl FlatStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Scalar>> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: Scalar) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.entries
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::KeyMissing(key.to_string()))
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn supports_key_after(&self) -> bool {
        true
    }

    fn key_after(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .range::<str, _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone()))
    }
}

/// Unordered in-memory store
///
/// No `key_after`: forces the flattening layer onto its scan-everything
/// algorithms.
#[derive(Debug, Default)]
pub struct HashStore {
    entries: FxHashMap<String, Scalar>,
}

impl HashStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlatStore for HashStore {
    fn get(&self, key: &str) -> Result<Option<Scalar>> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: Scalar) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.entries
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::KeyMissing(key.to_string()))
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_put_get_delete() {
        let mut store = MemoryStore::new();
        store.put("a", Scalar::Int(1)).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(Scalar::Int(1)));
        assert!(store.contains("a").unwrap());

        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert!(matches!(store.delete("a"), Err(Error::KeyMissing(_))));
    }

    #[test]
    fn test_memory_key_after() {
        let mut store = MemoryStore::new();
        store.put("a", Scalar::Int(1)).unwrap();
        store.put("b", Scalar::Int(2)).unwrap();
        store.put("bb", Scalar::Int(3)).unwrap();

        assert!(store.supports_key_after());
        assert_eq!(store.key_after("").unwrap(), Some("a".to_string()));
        assert_eq!(store.key_after("a").unwrap(), Some("b".to_string()));
        assert_eq!(store.key_after("b").unwrap(), Some("bb".to_string()));
        assert_eq!(store.key_after("bb").unwrap(), None);
        // strict successor, also for keys not present
        assert_eq!(store.key_after("az").unwrap(), Some("b".to_string()));
    }

    #[test]
    fn test_memory_keys_sorted() {
        let mut store = MemoryStore::new();
        store.put("z", Scalar::Null).unwrap();
        store.put("a", Scalar::Null).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a", "z"]);
    }

    #[test]
    fn test_hash_store_basics() {
        let mut store = HashStore::new();
        assert!(!store.supports_key_after());
        store.put("k", Scalar::Text("v".into())).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(Scalar::Text("v".into())));
        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k"]);
    }
}
