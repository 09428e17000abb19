//! The flat store contract
//!
//! A jotdb document is a set of encoded-path keys in a flat string
//! keyspace. This trait is the narrow waist between the flattening layer
//! and whatever actually holds those keys.
//!
//! `key_after` is optional: a backend that can answer strict-successor
//! queries advertises it with [`FlatStore::supports_key_after`], and the
//! flattening layer picks its ordered algorithms. Without it, iteration
//! and purge fall back to full scans, which are correct but scale with
//! the total key count.

use jotdb_core::{Result, Scalar};
use parking_lot::Mutex;
use std::sync::Arc;

/// Ordered (or unordered) flat mapping from encoded-path keys to scalars
pub trait FlatStore: Send {
    /// Read the scalar stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<Scalar>>;

    /// Store `value` under `key`, replacing any existing entry
    fn put(&mut self, key: &str, value: Scalar) -> Result<()>;

    /// Remove the entry under `key`
    ///
    /// Fails with [`jotdb_core::Error::KeyMissing`] when absent.
    fn delete(&mut self, key: &str) -> Result<()>;

    /// True when `key` is present
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Snapshot of every key currently stored
    fn keys(&self) -> Result<Vec<String>>;

    /// Whether [`FlatStore::key_after`] is implemented
    fn supports_key_after(&self) -> bool {
        false
    }

    /// The smallest stored key strictly greater than `key`
    ///
    /// Only called when [`FlatStore::supports_key_after`] returns true.
    fn key_after(&self, key: &str) -> Result<Option<String>> {
        let _ = key;
        Ok(None)
    }

    /// Make previous writes durable, where the backend supports it
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the backing resource
    ///
    /// After close, every operation fails with
    /// [`jotdb_core::Error::DbClosed`]. Closing twice is allowed.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Shared handle to a flat store
///
/// Views and overlays address the same store; state lives entirely inside
/// it, so any number of handles over the same prefix may coexist.
pub type SharedStore = Arc<Mutex<dyn FlatStore>>;

/// Wrap a concrete store into a [`SharedStore`]
pub fn shared(store: impl FlatStore + 'static) -> SharedStore {
    Arc::new(Mutex::new(store))
}
