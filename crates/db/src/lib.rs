//! Document handle and rollback overlay for jotdb
//!
//! [`Db`] is the caller-facing handle to one document: it opens the
//! backing store lazily, hands out [`Entry`] values for nested traversal,
//! and owns `commit`/`rollback`.
//!
//! Underneath, every mutation is buffered in a copy-on-write overlay tree
//! ([`overlay`]) until `commit` flushes it into the flattening views in a
//! children-before-parents, writes-before-deletes order. `rollback` drops
//! the buffers and nothing reaches the store.

pub mod entry;
pub mod handle;
mod overlay;

pub use entry::{Datum, Entry, MapRef, SeqRef};
pub use handle::Db;

// Re-exports so callers need only this crate (the facade crate passes
// them through).
pub use jotdb_core::{Error, FlatPath, PathKind, Result, Scalar, Value};
pub use jotdb_flatten::{MapView, Node, SeqView};
pub use jotdb_store::{shared, FileStore, FlatStore, HashStore, MemoryStore, SharedStore};
