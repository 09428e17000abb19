//! The document handle
//!
//! [`Db`] mirrors the lifecycle of the original store: constructing a
//! handle costs nothing, the backing store is opened on first use, and
//! everything after [`Db::close`] fails with `DbClosed`. Dropping the
//! handle closes the store (best-effort); uncommitted changes are
//! discarded either way.

use crate::entry::{prepare, Datum, Entry, MapRef};
use crate::overlay::{Doc, DocInner, ROOT};
use jotdb_core::{Error, Result, Value};
use jotdb_store::{shared, FileStore, FlatStore, SharedStore};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

enum Backend {
    /// Open the file lazily on first access
    File(PathBuf),
    /// A store provided up front; taken when the document opens
    Prebuilt(Option<SharedStore>),
}

struct DbState {
    backend: Backend,
    doc: Option<Doc>,
    closed: bool,
}

/// A file-backed document of JSON-shaped data
///
/// Mutations buffer in memory until [`Db::commit`]; [`Db::rollback`]
/// discards them. Nested containers are reached through [`Entry`] values
/// and share the same transaction.
///
/// # Examples
///
/// ```no_run
/// use jotdb_db::Db;
///
/// fn main() -> jotdb_db::Result<()> {
///     let db = Db::open("data.jotdb");
///     db.set("greeting", "hello")?;
///     db.commit()?;
///     db.close()?;
///     Ok(())
/// }
/// ```
pub struct Db {
    state: Mutex<DbState>,
}

impl Db {
    /// A handle over the store file at `path`
    ///
    /// The file is created or opened on first read or write, not here.
    pub fn open(path: impl AsRef<Path>) -> Db {
        Db::with_backend(Backend::File(path.as_ref().to_path_buf()))
    }

    /// A handle over a fresh in-memory store (ordered)
    pub fn in_memory() -> Db {
        Db::with_store(jotdb_store::MemoryStore::new())
    }

    /// A handle over any concrete store
    pub fn with_store(store: impl FlatStore + 'static) -> Db {
        Db::with_backend(Backend::Prebuilt(Some(shared(store))))
    }

    /// A handle over an already-shared store
    ///
    /// The caller keeps its own handle to the store and can observe the
    /// raw keyspace alongside the document.
    pub fn with_shared(store: SharedStore) -> Db {
        Db::with_backend(Backend::Prebuilt(Some(store)))
    }

    fn with_backend(backend: Backend) -> Db {
        Db {
            state: Mutex::new(DbState {
                backend,
                doc: None,
                closed: false,
            }),
        }
    }

    /// Open the store if needed and return the overlay handle
    fn doc(&self) -> Result<Doc> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::DbClosed);
        }
        if let Some(doc) = &state.doc {
            return Ok(doc.clone());
        }

        let store = match &mut state.backend {
            Backend::File(path) => {
                debug!(target: "jotdb::db", path = %path.display(), "opening document");
                shared(FileStore::open(&*path)?)
            }
            Backend::Prebuilt(slot) => slot.take().ok_or(Error::DbClosed)?,
        };
        let doc: Doc = Arc::new(Mutex::new(DocInner::new(store)));
        state.doc = Some(doc.clone());
        Ok(doc)
    }

    /// The root mapping of the document
    pub fn root(&self) -> Result<MapRef> {
        let doc = self.doc()?;
        Ok(MapRef { doc, id: ROOT })
    }

    /// Resolve the top-level child under `key`
    pub fn get(&self, key: &str) -> Result<Entry> {
        let doc = self.doc()?;
        let resolved = doc.lock().map_get(ROOT, key)?;
        Ok(Entry::from_resolved(&doc, resolved))
    }

    /// Assign `value` under the top-level `key`
    pub fn set(&self, key: &str, value: impl Into<Datum>) -> Result<()> {
        let doc = self.doc()?;
        let incoming = prepare(&doc, value.into())?;
        let result = doc.lock().map_set(ROOT, key, incoming);
        result
    }

    /// Delete the top-level child under `key`
    pub fn delete(&self, key: &str) -> Result<()> {
        self.doc()?.lock().map_delete(ROOT, key)
    }

    /// True when the top-level `key` resolves
    pub fn contains(&self, key: &str) -> Result<bool> {
        self.doc()?.lock().map_contains(ROOT, key)
    }

    /// The top-level keys
    pub fn keys(&self) -> Result<Vec<String>> {
        self.doc()?.lock().map_keys(ROOT)
    }

    /// Number of top-level children
    pub fn len(&self) -> Result<usize> {
        self.doc()?.lock().map_len(ROOT)
    }

    /// True when the document holds no keys
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Materialize the whole document, reflecting uncommitted state
    pub fn export(&self) -> Result<Value> {
        self.doc()?.lock().export_map(ROOT)
    }

    /// Flush all buffered mutations into the store
    pub fn commit(&self) -> Result<()> {
        self.doc()?.lock().commit()
    }

    /// Discard all buffered mutations
    pub fn rollback(&self) -> Result<()> {
        self.doc()?.lock().rollback()
    }

    /// Close the backing store
    ///
    /// Uncommitted changes are lost. Every later operation — on this
    /// handle or on entries previously read from it — fails with
    /// [`Error::DbClosed`]. Closing twice is allowed.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(doc) = state.doc.take() {
            let mut inner = doc.lock();
            inner.mark_closed();
            inner.store().lock().close()?;
            debug!(target: "jotdb::db", "document closed");
        }
        state.closed = true;
        Ok(())
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target: "jotdb::db", error = %e, "close on drop failed");
        }
    }
}
