//! Encoded path grammar for the flat keyspace
//!
//! A nested document position is addressed by a string over the grammar
//!
//! ```text
//! path      := "" | path dict_step | path list_step
//! dict_step := '.' '"' escaped_key '"'
//! list_step := '[' integer ']'
//! ```
//!
//! A full stored key is a path followed by a single terminator character
//! declaring the type of the node at that position:
//!
//! ```text
//! ."hello"[0]."world"=   the scalar value of d["hello"][0]["world"]
//! ."hello".              d["hello"] is a mapping (possibly empty)
//! ."hello"[              d["hello"] is a sequence (possibly empty)
//! ."hello"#              cached cardinality of d["hello"]
//! ```
//!
//! The terminators are chosen so that every marker key sorts strictly
//! before the subtree it introduces, and every descendant of a prefix `p`
//! sorts strictly below `p` + [`SUBTREE_MAX`]. The ordered-iteration and
//! purge algorithms in the flattening layer rely on both properties.

use crate::error::{Error, Result};
use std::fmt;

/// Sorts after every descendant key of the prefix it is appended to.
///
/// All grammar characters are ASCII, so appending this (multi-byte in
/// UTF-8, leading byte 0xC3) produces a key strictly greater than any key
/// extending the same prefix.
pub const SUBTREE_MAX: char = '\u{00ff}';

/// Classification of an encoded path by its final character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathKind {
    /// Empty, or ends in `"`: names a position whose parent is a mapping
    DictPrefix,
    /// Ends in `]`: names a position whose parent is a sequence
    ListPrefix,
    /// Ends in `.`: asserts the node at the prefix is a mapping
    DictMarker,
    /// Ends in `[`: asserts the node at the prefix is a sequence
    ListMarker,
    /// Ends in `=`: stores the scalar leaf at the prefix
    ValueMarker,
    /// Ends in `#`: stores the cached cardinality of the container
    LengthMarker,
}

impl PathKind {
    /// Prefix kinds name a position without declaring its type
    pub fn is_prefix(self) -> bool {
        matches!(self, PathKind::DictPrefix | PathKind::ListPrefix)
    }

    /// Marker kinds carry one trailing terminator character
    pub fn is_marker(self) -> bool {
        !self.is_prefix()
    }
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PathKind::DictPrefix => "dict prefix",
            PathKind::ListPrefix => "list prefix",
            PathKind::DictMarker => "dict marker",
            PathKind::ListMarker => "list marker",
            PathKind::ValueMarker => "value marker",
            PathKind::LengthMarker => "length marker",
        };
        f.write_str(name)
    }
}

/// An encoded path into the flat keyspace
///
/// Construction does not validate: classification happens lazily and
/// malformed strings surface as [`Error::PathCorrupt`] from the operation
/// that first inspects them. All extender operations type-check their
/// receiver and fail with [`Error::IncorrectType`] when the classification
/// violates the precondition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlatPath {
    encoded: String,
}

impl FlatPath {
    /// The empty path, naming the root mapping
    pub fn root() -> Self {
        FlatPath {
            encoded: String::new(),
        }
    }

    /// Wrap an already-encoded key or path string
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        FlatPath {
            encoded: encoded.into(),
        }
    }

    /// The encoded string
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Consume into the encoded string
    pub fn into_string(self) -> String {
        self.encoded
    }

    /// True for the empty (root) path
    pub fn is_root(&self) -> bool {
        self.encoded.is_empty()
    }

    /// Classify this path by its final character
    pub fn kind(&self) -> Result<PathKind> {
        let Some(last) = self.encoded.as_bytes().last() else {
            return Ok(PathKind::DictPrefix);
        };
        match last {
            b'.' => Ok(PathKind::DictMarker),
            b'[' => Ok(PathKind::ListMarker),
            b'=' => Ok(PathKind::ValueMarker),
            b'#' => Ok(PathKind::LengthMarker),
            b']' => Ok(PathKind::ListPrefix),
            b'"' => Ok(PathKind::DictPrefix),
            _ => Err(Error::PathCorrupt(self.encoded.clone())),
        }
    }

    fn ensure_prefix(&self) -> Result<()> {
        let kind = self.kind()?;
        if kind.is_prefix() {
            Ok(())
        } else {
            Err(self.incorrect(kind, "prefix"))
        }
    }

    fn ensure(&self, want: PathKind, wanted: &'static str) -> Result<()> {
        let kind = self.kind()?;
        if kind == want {
            Ok(())
        } else {
            Err(self.incorrect(kind, wanted))
        }
    }

    fn incorrect(&self, got: PathKind, wanted: &'static str) -> Error {
        Error::IncorrectType {
            path: self.encoded.clone(),
            got,
            wanted,
        }
    }

    /// The dict-type key for this position: `self + "."`
    pub fn dict(&self) -> Result<FlatPath> {
        self.ensure_prefix()?;
        Ok(FlatPath::from_encoded(format!("{}.", self.encoded)))
    }

    /// The list-type key for this position: `self + "["`
    pub fn list(&self) -> Result<FlatPath> {
        self.ensure_prefix()?;
        Ok(FlatPath::from_encoded(format!("{}[", self.encoded)))
    }

    /// The value key for this position: `self + "="`
    pub fn value(&self) -> Result<FlatPath> {
        self.ensure_prefix()?;
        Ok(FlatPath::from_encoded(format!("{}=", self.encoded)))
    }

    /// The length key for this position: `self + "#"`
    pub fn length(&self) -> Result<FlatPath> {
        self.ensure_prefix()?;
        Ok(FlatPath::from_encoded(format!("{}#", self.encoded)))
    }

    /// Extend a dict-type key with a quoted child key
    pub fn lookup(&self, key: &str) -> Result<FlatPath> {
        self.ensure(PathKind::DictMarker, "dict marker")?;
        Ok(FlatPath::from_encoded(format!(
            "{}\"{}\"",
            self.encoded,
            escape_key(key)
        )))
    }

    /// Extend a list-type key with a child index
    pub fn index(&self, index: usize) -> Result<FlatPath> {
        self.ensure(PathKind::ListMarker, "list marker")?;
        Ok(FlatPath::from_encoded(format!("{}{}]", self.encoded, index)))
    }

    /// Strip a single trailing terminator, if present
    pub fn prefix(&self) -> Result<FlatPath> {
        let kind = self.kind()?;
        if kind.is_marker() {
            Ok(FlatPath::from_encoded(
                &self.encoded[..self.encoded.len() - 1],
            ))
        } else {
            Ok(self.clone())
        }
    }

    /// The prefix path of the enclosing container
    ///
    /// Strips the final quoted key (dict prefix) or the final `[i]` step
    /// (list prefix). Fails with [`Error::RootNode`] on the empty path and
    /// [`Error::IncorrectType`] on marker paths.
    pub fn parent(&self) -> Result<FlatPath> {
        match self.kind()? {
            PathKind::ListPrefix => {
                let rest = strip_char(&self.encoded, b']')?;
                let (rest, _) = strip_terminal_integer(rest)?;
                let rest = strip_char(rest, b'[')?;
                Ok(FlatPath::from_encoded(rest))
            }
            PathKind::DictPrefix => {
                if self.encoded.is_empty() {
                    return Err(Error::RootNode);
                }
                let (rest, _) = strip_terminal_quoted(&self.encoded)?;
                let rest = strip_char(rest, b'.')?;
                Ok(FlatPath::from_encoded(rest))
            }
            kind => Err(self.incorrect(kind, "prefix")),
        }
    }

    /// The unescaped final key segment of a dict-prefix path
    pub fn key_string(&self) -> Result<String> {
        self.ensure(PathKind::DictPrefix, "dict prefix")?;
        if self.encoded.is_empty() {
            return Err(Error::RootNode);
        }
        let (_, key) = strip_terminal_quoted(&self.encoded)?;
        Ok(key)
    }

    /// The final integer of a list-prefix path
    pub fn index_number(&self) -> Result<usize> {
        self.ensure(PathKind::ListPrefix, "list prefix")?;
        let rest = strip_char(&self.encoded, b']')?;
        let (rest, index) = strip_terminal_integer(rest)?;
        strip_char(rest, b'[')?;
        Ok(index)
    }

    /// Number of path steps between the root and this position
    pub fn depth(&self) -> Result<usize> {
        let mut depth = 0;
        let mut path = self.clone();
        loop {
            path = path.prefix()?;
            if path.encoded.is_empty() {
                return Ok(depth);
            }
            depth += 1;
            path = path.parent()?;
        }
    }

    /// True when `self` extends `other` (prefix-of relation on keys)
    pub fn starts_with(&self, other: &FlatPath) -> bool {
        self.encoded.starts_with(&other.encoded)
    }
}

impl fmt::Display for FlatPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// Escape `\` and `"` in a mapping key for embedding between quotes
fn escape_key(key: &str) -> String {
    key.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Reverse of [`escape_key`]
fn unescape_key(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Strip a terminal quoted key segment, returning the remainder and the
/// unescaped key.
///
/// Scans backwards from the closing quote. An interior quote in the
/// escaped text always has a backslash immediately to its left, and the
/// opening quote never does (the grammar puts `.` there), so the first
/// unescorted quote found is the opening one.
fn strip_terminal_quoted(s: &str) -> Result<(&str, String)> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes[bytes.len() - 1] != b'"' {
        return Err(Error::PathCorrupt(s.to_string()));
    }
    let closing = bytes.len() - 1;
    let mut i = closing;
    let opening = loop {
        if i == 0 {
            return Err(Error::PathCorrupt(s.to_string()));
        }
        i -= 1;
        if bytes[i] == b'"' {
            if i > 0 && bytes[i - 1] == b'\\' {
                i -= 1;
                continue;
            }
            break i;
        }
    };
    let key = unescape_key(&s[opening + 1..closing]);
    Ok((&s[..opening], key))
}

/// Strip a terminal run of decimal digits, returning the remainder and
/// the parsed integer.
fn strip_terminal_integer(s: &str) -> Result<(&str, usize)> {
    let bytes = s.as_bytes();
    let mut start = bytes.len();
    while start > 0 && bytes[start - 1].is_ascii_digit() {
        start -= 1;
    }
    if start == bytes.len() {
        return Err(Error::PathCorrupt(s.to_string()));
    }
    let index = s[start..]
        .parse::<usize>()
        .map_err(|_| Error::PathCorrupt(s.to_string()))?;
    Ok((&s[..start], index))
}

/// Strip one expected terminal character
fn strip_char(s: &str, expected: u8) -> Result<&str> {
    match s.as_bytes().last() {
        Some(&last) if last == expected => Ok(&s[..s.len() - 1]),
        _ => Err(Error::PathCorrupt(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> FlatPath {
        FlatPath::from_encoded(s)
    }

    // === Classification ===

    #[test]
    fn test_kind_root() {
        assert_eq!(FlatPath::root().kind().unwrap(), PathKind::DictPrefix);
    }

    #[test]
    fn test_kind_by_terminator() {
        assert_eq!(path(".\"a\"").kind().unwrap(), PathKind::DictPrefix);
        assert_eq!(path(".\"a\"[0]").kind().unwrap(), PathKind::ListPrefix);
        assert_eq!(path(".\"a\".").kind().unwrap(), PathKind::DictMarker);
        assert_eq!(path(".\"a\"[").kind().unwrap(), PathKind::ListMarker);
        assert_eq!(path(".\"a\"=").kind().unwrap(), PathKind::ValueMarker);
        assert_eq!(path(".\"a\"#").kind().unwrap(), PathKind::LengthMarker);
    }

    #[test]
    fn test_kind_corrupt() {
        assert!(matches!(
            path(".\"a\"x").kind(),
            Err(Error::PathCorrupt(_))
        ));
    }

    // === Extenders ===

    #[test]
    fn test_extenders() {
        let p = path(".\"hello\"");
        assert_eq!(p.value().unwrap(), path(".\"hello\"="));
        assert_eq!(p.dict().unwrap(), path(".\"hello\"."));
        assert_eq!(p.list().unwrap(), path(".\"hello\"["));
        assert_eq!(p.length().unwrap(), path(".\"hello\"#"));
    }

    #[test]
    fn test_extenders_reject_markers() {
        assert!(matches!(
            path(".\"hello\"=").value(),
            Err(Error::IncorrectType { .. })
        ));
        assert!(matches!(
            path(".\"hello\".").dict(),
            Err(Error::IncorrectType { .. })
        ));
    }

    #[test]
    fn test_lookup_and_index() {
        let root = FlatPath::root();
        let child = root.dict().unwrap().lookup("hello").unwrap();
        assert_eq!(child.as_str(), ".\"hello\"");

        let item = child.list().unwrap().index(3).unwrap();
        assert_eq!(item.as_str(), ".\"hello\"[3]");
    }

    #[test]
    fn test_lookup_requires_dict_marker() {
        assert!(matches!(
            path(".\"a\"").lookup("b"),
            Err(Error::IncorrectType { .. })
        ));
    }

    #[test]
    fn test_index_requires_list_marker() {
        assert!(matches!(
            path(".\"a\"").index(0),
            Err(Error::IncorrectType { .. })
        ));
    }

    // === Prefix / parent ===

    #[test]
    fn test_prefix_strips_one_terminator() {
        assert_eq!(path(".\"hello\"#").prefix().unwrap(), path(".\"hello\""));
        assert_eq!(path(".\"hello\"=").prefix().unwrap(), path(".\"hello\""));
        assert_eq!(path(".\"hello\".").prefix().unwrap(), path(".\"hello\""));
        assert_eq!(path(".\"hello\"").prefix().unwrap(), path(".\"hello\""));
    }

    #[test]
    fn test_parent_dict() {
        assert_eq!(path(".\"hello\"").parent().unwrap(), FlatPath::root());
        assert_eq!(
            path(".\"a\".\"b\"").parent().unwrap(),
            path(".\"a\"")
        );
    }

    #[test]
    fn test_parent_list() {
        assert_eq!(path(".\"hello\"[0]").parent().unwrap(), path(".\"hello\""));
        assert_eq!(path(".\"a\"[12][3]").parent().unwrap(), path(".\"a\"[12]"));
    }

    #[test]
    fn test_parent_of_root_fails() {
        assert!(matches!(FlatPath::root().parent(), Err(Error::RootNode)));
    }

    #[test]
    fn test_parent_of_length_prefix_of_root() {
        // "#" strips to the root, whose parent does not exist
        assert!(matches!(
            path("#").prefix().unwrap().parent(),
            Err(Error::RootNode)
        ));
    }

    // === Segment accessors ===

    #[test]
    fn test_key_string() {
        assert_eq!(path(".\"hello\"").key_string().unwrap(), "hello");
        assert_eq!(path(".\"a\".\"b\"").key_string().unwrap(), "b");
        assert_eq!(path(".\"\"").key_string().unwrap(), "");
    }

    #[test]
    fn test_key_string_escaped() {
        let root = FlatPath::root().dict().unwrap();
        for key in ["with\"quote", "with\\slash", "\\", "\"", "a\\\"b", ""] {
            let child = root.lookup(key).unwrap();
            assert_eq!(child.key_string().unwrap(), key, "key {:?}", key);
            assert_eq!(child.parent().unwrap(), FlatPath::root());
        }
    }

    #[test]
    fn test_index_number() {
        assert_eq!(path(".\"a\"[0]").index_number().unwrap(), 0);
        assert_eq!(path(".\"a\"[107]").index_number().unwrap(), 107);
        assert!(matches!(
            path(".\"a\"").index_number(),
            Err(Error::IncorrectType { .. })
        ));
    }

    // === Depth ===

    #[test]
    fn test_depth() {
        assert_eq!(path(".\"hello\"").depth().unwrap(), 1);
        assert_eq!(path(".\"hello\".\"two\"").depth().unwrap(), 2);
        assert_eq!(path(".\"hello\".\"two\"[0]").depth().unwrap(), 3);
        assert_eq!(FlatPath::root().depth().unwrap(), 0);
    }

    // === Ordering invariants ===

    #[test]
    fn test_marker_sorts_before_subtree() {
        let node = path(".\"a\"");
        let dict_marker = node.dict().unwrap();
        let child = dict_marker.lookup("b").unwrap().value().unwrap();
        assert!(dict_marker.as_str() < child.as_str());
    }

    #[test]
    fn test_subtree_max_sorts_after_descendants() {
        let node = path(".\"a\"");
        let fence = format!("{}{}", node.as_str(), SUBTREE_MAX);
        let deep = node
            .dict()
            .unwrap()
            .lookup("zzz")
            .unwrap()
            .value()
            .unwrap();
        assert!(deep.as_str() < fence.as_str());
        assert!(node.as_str() < fence.as_str());
    }

    #[test]
    fn test_escape_round_trip() {
        for key in ["plain", "sp ace", "uni\u{00e9}", "q\"q", "b\\b", "\\\""] {
            assert_eq!(unescape_key(&escape_key(key)), key);
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_lookup_round_trips_any_key(key in any::<String>()) {
                let child = FlatPath::root().dict().unwrap().lookup(&key).unwrap();
                prop_assert_eq!(child.kind().unwrap(), PathKind::DictPrefix);
                prop_assert_eq!(child.key_string().unwrap(), key);
                prop_assert_eq!(child.parent().unwrap(), FlatPath::root());
            }

            #[test]
            fn prop_nested_lookup_round_trips(outer in any::<String>(), inner in any::<String>()) {
                let parent = FlatPath::root().dict().unwrap().lookup(&outer).unwrap();
                let child = parent.dict().unwrap().lookup(&inner).unwrap();
                prop_assert_eq!(child.key_string().unwrap(), inner);
                prop_assert_eq!(child.parent().unwrap(), parent);
                prop_assert_eq!(child.depth().unwrap(), 2);
            }

            #[test]
            fn prop_index_round_trips(index in 0usize..1_000_000) {
                let item = FlatPath::root()
                    .dict().unwrap()
                    .lookup("items").unwrap()
                    .list().unwrap()
                    .index(index).unwrap();
                prop_assert_eq!(item.kind().unwrap(), PathKind::ListPrefix);
                prop_assert_eq!(item.index_number().unwrap(), index);
                prop_assert_eq!(
                    item.parent().unwrap(),
                    FlatPath::from_encoded(".\"items\"")
                );
            }
        }
    }
}
