//! Core types for jotdb
//!
//! This crate defines the pieces every other layer depends on:
//! - `FlatPath`: the encoded path grammar that maps tree positions to
//!   flat store keys
//! - `Scalar` / `Value`: the JSON value model
//! - `Error` / `Result`: the unified error type
//!
//! Nothing in this crate touches storage; it is pure data and string
//! manipulation.

pub mod error;
pub mod path;
pub mod scalar;
pub mod value;

pub use error::{Error, Result};
pub use path::{FlatPath, PathKind, SUBTREE_MAX};
pub use scalar::Scalar;
pub use value::Value;
