//! Error types for jotdb
//!
//! One unified error enum for the whole system, built with `thiserror`.
//!
//! ## Error Categories
//!
//! - **Not found**: `KeyMissing`, `IndexOutOfRange` — user-level lookups
//!   that missed; callers routinely match on these.
//! - **Corruption**: `PathCorrupt`, `IncorrectType`, `CorruptStore` — the
//!   flat keyspace violates its own grammar or invariants. Not recoverable
//!   by the layers above; propagated to the caller.
//! - **Usage**: `RootNode`, `NotTopLevel`, `ValueRejected`, `DbClosed` —
//!   the operation is invalid for the node or handle it was invoked on.
//! - **Storage**: `Io`, `Storage`, `Codec` — the backing store or the
//!   scalar codec failed.

use crate::path::PathKind;
use std::io;
use thiserror::Error;

/// Result type alias for jotdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all jotdb operations
#[derive(Debug, Error)]
pub enum Error {
    /// Requested mapping key is absent
    #[error("key not found: {0:?}")]
    KeyMissing(String),

    /// Sequence index outside `[-len, len)`
    #[error("index {index} out of range for sequence of length {len}")]
    IndexOutOfRange {
        /// Index as given by the caller (may be negative)
        index: i64,
        /// Length of the sequence at the time of the call
        len: usize,
    },

    /// A path operation was invoked on the wrong kind of path
    #[error("path {path:?}: wanted {wanted}, got {got}")]
    IncorrectType {
        /// The encoded path
        path: String,
        /// Classification the path actually has
        got: PathKind,
        /// Classification the operation required
        wanted: &'static str,
    },

    /// An encoded path string fails the grammar
    #[error("corrupt path: {0:?}")]
    PathCorrupt(String),

    /// `parent` was attempted on the empty (root) path
    #[error("operation is not supported for the root node")]
    RootNode,

    /// The flat keyspace violates a store-level invariant
    #[error("corrupt store: {0}")]
    CorruptStore(String),

    /// Operation attempted on a closed database handle
    #[error("database is closed")]
    DbClosed,

    /// A value outside the JSON variant was written
    #[error("value rejected: {0}")]
    ValueRejected(String),

    /// `commit`/`rollback` invoked on a non-root overlay
    #[error("commit and rollback are only available at the top level")]
    NotTopLevel,

    /// I/O error from the backing file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Backing store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Scalar codec failure
    #[error("codec error: {0}")]
    Codec(String),
}

impl Error {
    /// Create a `CorruptStore` error
    pub fn corrupt_store(message: impl Into<String>) -> Self {
        Error::CorruptStore(message.into())
    }

    /// Create a `Storage` error
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage(message.into())
    }

    /// Create a `Codec` error
    pub fn codec(message: impl Into<String>) -> Self {
        Error::Codec(message.into())
    }

    /// Create a `ValueRejected` error
    pub fn value_rejected(message: impl Into<String>) -> Self {
        Error::ValueRejected(message.into())
    }

    /// Check if this is a "not found" error
    ///
    /// Returns true for `KeyMissing` and `IndexOutOfRange`. These are the
    /// only errors a caller should treat as part of normal control flow.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::KeyMissing(_) | Error::IndexOutOfRange { .. }
        )
    }

    /// Check if this error indicates keyspace corruption
    ///
    /// Returns true for `PathCorrupt`, `IncorrectType` and `CorruptStore`.
    /// These should be logged and investigated; retrying will not help.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::PathCorrupt(_) | Error::IncorrectType { .. } | Error::CorruptStore(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_missing_display() {
        let err = Error::KeyMissing("hello".to_string());
        assert!(err.to_string().contains("key not found"));
        assert!(err.to_string().contains("hello"));
    }

    #[test]
    fn test_index_out_of_range_display() {
        let err = Error::IndexOutOfRange { index: -3, len: 2 };
        let msg = err.to_string();
        assert!(msg.contains("-3"));
        assert!(msg.contains('2'));
    }

    #[test]
    fn test_incorrect_type_display() {
        let err = Error::IncorrectType {
            path: ".\"a\"=".to_string(),
            got: PathKind::ValueMarker,
            wanted: "prefix",
        };
        let msg = err.to_string();
        assert!(msg.contains("wanted prefix"));
        assert!(msg.contains("value marker"));
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::KeyMissing("k".into()).is_not_found());
        assert!(Error::IndexOutOfRange { index: 0, len: 0 }.is_not_found());
        assert!(!Error::RootNode.is_not_found());
        assert!(!Error::DbClosed.is_not_found());
    }

    #[test]
    fn test_is_corruption() {
        assert!(Error::PathCorrupt("x".into()).is_corruption());
        assert!(Error::corrupt_store("two markers").is_corruption());
        assert!(!Error::KeyMissing("k".into()).is_corruption());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing file");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_result_alias() {
        fn ok() -> Result<u32> {
            Ok(7)
        }
        assert_eq!(ok().unwrap(), 7);
    }
}
