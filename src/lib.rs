//! # jotdb
//!
//! A file-backed persistent store for JSON object trees.
//!
//! A [`Db`] behaves like a mutable JSON document: nested mappings,
//! sequences and scalar leaves, addressed by key and index. Mutations
//! buffer in memory and either [`commit`](Db::commit) atomically into an
//! embedded ordered key-value file or disappear on
//! [`rollback`](Db::rollback). The document never needs to fit in
//! memory: nested nodes resolve lazily through path-addressed keys in
//! the flat store.
//!
//! # Quick Start
//!
//! ```no_run
//! use jotdb::Db;
//! use serde_json::json;
//!
//! fn main() -> jotdb::Result<()> {
//!     let db = Db::open("./my-data.jotdb");
//!
//!     db.set("config", json!({"retries": 3, "hosts": ["a", "b"]}))?;
//!     db.commit()?;
//!
//!     let config = db.get("config")?;
//!     let hosts = config.as_map().unwrap().get("hosts")?;
//!     hosts.as_seq().unwrap().push("c")?;
//!     db.commit()?;
//!
//!     db.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Layers
//!
//! | Layer | Crate | Responsibility |
//! |-------|-------|----------------|
//! | Path grammar | `jotdb-core` | Encode/decode/classify the flat keys |
//! | Flat stores | `jotdb-store` | Ordered KV backends (memory, file) |
//! | Flattening views | `jotdb-flatten` | Nested document over flat keys |
//! | Overlay + handle | `jotdb-db` | Copy-on-write buffering, commit/rollback |
//!
//! Only the API surface re-exported here is stable.

pub use jotdb_db::*;
