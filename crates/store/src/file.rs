//! File-backed store
//!
//! A single `redb` table holds the whole flat keyspace; scalars are
//! stored as JSON text through [`crate::codec`]. redb is a B-tree file,
//! so `key_after` is a range query and iteration order is lexicographic.
//!
//! Every operation runs in its own transaction. Commit-level batching is
//! left to the layers above; what matters here is that reads see the keys
//! exactly as §3-invariant-preserving writes left them.

use crate::codec;
use crate::store::FlatStore;
use jotdb_core::{Error, Result, Scalar};
use redb::{Database, ReadableTable, TableDefinition};
use std::fmt;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const TABLE: TableDefinition<&str, &str> = TableDefinition::new("jotdb");

/// Embedded B-tree file store
pub struct FileStore {
    path: PathBuf,
    /// `None` once closed; every operation then fails with `DbClosed`
    db: Option<Database>,
}

impl FileStore {
    /// Open (or create) the store file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).map_err(backend)?;

        // Ensure the table exists so read transactions never race its
        // creation.
        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(TABLE).map_err(backend)?;
        txn.commit().map_err(backend)?;

        debug!(target: "jotdb::store", path = %path.display(), "file store opened");
        Ok(FileStore {
            path,
            db: Some(db),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn database(&self) -> Result<&Database> {
        self.db.as_ref().ok_or(Error::DbClosed)
    }
}

impl fmt::Debug for FileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("closed", &self.db.is_none())
            .finish()
    }
}

impl FlatStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Scalar>> {
        let txn = self.database()?.begin_read().map_err(backend)?;
        let table = txn.open_table(TABLE).map_err(backend)?;
        match table.get(key).map_err(backend)? {
            Some(guard) => Ok(Some(codec::decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn put(&mut self, key: &str, value: Scalar) -> Result<()> {
        let encoded = codec::encode(&value)?;
        let txn = self.database()?.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(TABLE).map_err(backend)?;
            table.insert(key, encoded.as_str()).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let txn = self.database()?.begin_write().map_err(backend)?;
        let removed = {
            let mut table = txn.open_table(TABLE).map_err(backend)?;
            let existed = table.remove(key).map_err(backend)?.is_some();
            existed
        };
        txn.commit().map_err(backend)?;
        if removed {
            Ok(())
        } else {
            Err(Error::KeyMissing(key.to_string()))
        }
    }

    fn contains(&self, key: &str) -> Result<bool> {
        let txn = self.database()?.begin_read().map_err(backend)?;
        let table = txn.open_table(TABLE).map_err(backend)?;
        Ok(table.get(key).map_err(backend)?.is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let txn = self.database()?.begin_read().map_err(backend)?;
        let table = txn.open_table(TABLE).map_err(backend)?;
        let mut keys = Vec::new();
        for entry in table.iter().map_err(backend)? {
            let (key, _) = entry.map_err(backend)?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }

    fn supports_key_after(&self) -> bool {
        true
    }

    fn key_after(&self, key: &str) -> Result<Option<String>> {
        let txn = self.database()?.begin_read().map_err(backend)?;
        let table = txn.open_table(TABLE).map_err(backend)?;
        let mut range = table
            .range::<&str>((Bound::Excluded(key), Bound::Unbounded))
            .map_err(backend)?;
        match range.next() {
            Some(entry) => {
                let (found, _) = entry.map_err(backend)?;
                Ok(Some(found.value().to_string()))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.db.take().is_some() {
            debug!(target: "jotdb::store", path = %self.path.display(), "file store closed");
        }
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(
                target: "jotdb::store",
                error = %e,
                path = %self.path.display(),
                "file store close on drop failed"
            );
        }
    }
}

fn backend(e: impl fmt::Display) -> Error {
    Error::storage(e.to_string())
}
