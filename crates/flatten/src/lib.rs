//! Flattening views over a flat keyspace
//!
//! This crate presents a nested JSON document over a [`jotdb_store::FlatStore`]
//! using the encoded path grammar from `jotdb-core`:
//!
//! - [`MapView`]: a mapping rooted at a dict-prefix path (the root mapping
//!   has the empty prefix)
//! - [`SeqView`]: a sequence rooted at a prefix path
//! - [`Node`]: the result of reading a child — a scalar leaf or a nested
//!   view
//!
//! Views are lightweight handles `(store, prefix)`; two views over the
//! same prefix are interchangeable because all state lives in the store.
//! A view whose position has been purged fails with `KeyMissing` on its
//! next use.

mod access;
pub mod map;
pub mod seq;

pub use map::MapView;
pub use seq::SeqView;

use jotdb_core::{FlatPath, Result, Scalar, Value};

/// A resolved child of a view: scalar leaf or nested container view
#[derive(Debug, Clone)]
pub enum Node {
    /// Scalar leaf
    Scalar(Scalar),
    /// Nested mapping view
    Map(MapView),
    /// Nested sequence view
    Seq(SeqView),
}

impl Node {
    /// The prefix path this node addresses, for container nodes
    pub fn path(&self) -> Option<&FlatPath> {
        match self {
            Node::Scalar(_) => None,
            Node::Map(view) => Some(view.path()),
            Node::Seq(view) => Some(view.path()),
        }
    }

    /// Materialize the node into a plain value tree
    ///
    /// Container nodes are read out of the store recursively; the result
    /// shares nothing with the store.
    pub fn to_value(&self) -> Result<Value> {
        match self {
            Node::Scalar(s) => Ok(Value::from(s.clone())),
            Node::Map(view) => view.export(),
            Node::Seq(view) => view.export(),
        }
    }
}
