// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tree paths and their ordered key encoding.
//!
//! A [`TreePath`] is a cleaned, `/`-separated sequence of segments addressing
//! one node in the tree. Paths map onto flat byte keys so that an ordered
//! key-value store yields a subtree with a single range scan:
//!
//! ```text
//! /fruits/banana  →  01 "fruits" 01 "banana"
//! value attr      →  01 "fruits" 01 "banana" 00 'v'
//! rev attr        →  01 "fruits" 01 "banana" 00 'r'
//! ```
//!
//! The attribute marker (`0x00`) sorts before the segment separator (`0x01`),
//! and escaped segment bytes are always `>= 0x02`, so a node's attributes are
//! contiguous, immediately precede its children, and the whole subtree comes
//! back in pre-order. Escaping is order-preserving: siblings sort by their raw
//! segment bytes.

use std::fmt;

use crate::error::SummaError;

/// Separator between encoded segments.
const SEG_SEP: u8 = 0x01;
/// Marker between an encoded path and its attribute byte.
const ATTR_MARK: u8 = 0x00;
/// Escape byte for raw `0x00`/`0x01`/`0x02` inside a segment.
const ESCAPE: u8 = 0x02;

/// Reserved segment names addressing node attributes on reads.
pub const SEG_VAL: &str = "_val";
pub const SEG_REV: &str = "_rev";
pub const SEG_DELETED: &str = "_deleted";
/// First segment of the local-document namespace.
pub const SEG_LOCAL: &str = "_local";

/// Per-node attribute stored under its own key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attr {
    /// Raw JSON scalar bytes.
    Value,
    /// Revision string, `<gen>-<hex32>`.
    Rev,
    /// Last sequence stamped on this path, 8 bytes big-endian.
    Seq,
    /// Tombstone marker (presence means deleted).
    Deleted,
    /// Acknowledged non-winning revs, JSON array of strings.
    RevHistory,
}

impl Attr {
    fn as_byte(self) -> u8 {
        match self {
            Attr::Value => b'v',
            Attr::Rev => b'r',
            Attr::Seq => b's',
            Attr::Deleted => b'd',
            Attr::RevHistory => b'a',
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'v' => Some(Attr::Value),
            b'r' => Some(Attr::Rev),
            b's' => Some(Attr::Seq),
            b'd' => Some(Attr::Deleted),
            b'a' => Some(Attr::RevHistory),
            _ => None,
        }
    }
}

/// A cleaned tree path. The empty path is the root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    /// The root path.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse and normalize a raw slash-separated path.
    ///
    /// Leading, trailing and duplicate slashes collapse; `.` segments drop;
    /// `..` traversal is rejected.
    pub fn parse(raw: &str) -> Result<Self, SummaError> {
        let mut segments = Vec::new();
        for seg in raw.split('/') {
            match seg {
                "" | "." => continue,
                ".." => {
                    return Err(SummaError::BadRequest(format!(
                        "path traversal not allowed: {raw}"
                    )))
                }
                s => segments.push(s.to_string()),
            }
        }
        Ok(Self { segments })
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Child of this path.
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    /// Append all of `other`'s segments.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Parent path; `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Drop the final segment, returning `(parent, segment)`.
    #[must_use]
    pub fn split_last(&self) -> Option<(Self, &str)> {
        let last = self.segments.last()?;
        Some((self.parent().expect("non-root has a parent"), last))
    }

    /// True when `self` is `prefix` or a descendant of it.
    #[must_use]
    pub fn is_under(&self, prefix: &Self) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Segments of `self` below `prefix`. Empty when equal.
    #[must_use]
    pub fn relative_to(&self, prefix: &Self) -> &[String] {
        debug_assert!(self.is_under(prefix));
        &self.segments[prefix.segments.len()..]
    }

    /// True for paths in the `_local/` namespace, at any depth of nesting
    /// (local docs exist per subtree database).
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.segments.iter().any(|s| s == SEG_LOCAL)
    }

    /// True when any segment is reserved (leading underscore).
    #[must_use]
    pub fn has_reserved_segment(&self) -> bool {
        self.segments.iter().any(|s| s.starts_with('_'))
    }

    /// Strip a trailing `_val`/`_rev`/`_deleted` segment, if present.
    #[must_use]
    pub fn split_attr_suffix(&self) -> (Self, Option<Attr>) {
        let attr = match self.last() {
            Some(SEG_VAL) => Some(Attr::Value),
            Some(SEG_REV) => Some(Attr::Rev),
            Some(SEG_DELETED) => Some(Attr::Deleted),
            _ => None,
        };
        match attr {
            Some(a) => (
                self.parent().expect("suffix implies non-root"),
                Some(a),
            ),
            None => (self.clone(), None),
        }
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for seg in &self.segments {
            write!(f, "/{seg}")?;
        }
        Ok(())
    }
}

/// Escape a segment so it contains no `0x00`/`0x01`/`0x02` bytes.
///
/// Bytes below `0x03` become `0x02, byte`. The mapping preserves byte order,
/// so siblings sort lexicographically by their raw segment.
#[must_use]
pub fn escape(segment: &str) -> Vec<u8> {
    let raw = segment.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    for &b in raw {
        if b <= ESCAPE {
            out.push(ESCAPE);
        }
        out.push(b);
    }
    out
}

fn unescape(encoded: &[u8]) -> Result<String, SummaError> {
    let mut out = Vec::with_capacity(encoded.len());
    let mut iter = encoded.iter();
    while let Some(&b) = iter.next() {
        if b == ESCAPE {
            match iter.next() {
                Some(&escaped) => out.push(escaped),
                None => {
                    return Err(SummaError::BadRequest(
                        "truncated escape in stored key".into(),
                    ))
                }
            }
        } else {
            out.push(b);
        }
    }
    String::from_utf8(out)
        .map_err(|e| SummaError::BadRequest(format!("stored key is not UTF-8: {e}")))
}

/// Encode a path without any attribute suffix. The root encodes to nothing.
#[must_use]
pub fn encode_prefix(path: &TreePath) -> Vec<u8> {
    let mut key = Vec::new();
    for seg in path.segments() {
        key.push(SEG_SEP);
        key.extend_from_slice(&escape(seg));
    }
    key
}

/// Encode the key for one attribute of one node.
#[must_use]
pub fn encode(path: &TreePath, attr: Attr) -> Vec<u8> {
    let mut key = encode_prefix(path);
    key.push(ATTR_MARK);
    key.push(attr.as_byte());
    key
}

/// Key range `[start, end)` covering a node's own attributes and its entire
/// subtree, and nothing else (in particular no sibling whose name extends
/// this one, like `ab` under a scan of `a`).
#[must_use]
pub fn subtree_range(path: &TreePath) -> (Vec<u8>, Vec<u8>) {
    let prefix = encode_prefix(path);
    let mut start = prefix.clone();
    start.push(ATTR_MARK);
    let mut end = prefix;
    end.push(ESCAPE);
    (start, end)
}

/// Key range covering only the descendants of a node (attributes excluded).
#[must_use]
pub fn children_range(path: &TreePath) -> (Vec<u8>, Vec<u8>) {
    let prefix = encode_prefix(path);
    let mut start = prefix.clone();
    start.push(SEG_SEP);
    let mut end = prefix;
    end.push(ESCAPE);
    (start, end)
}

/// Decode a stored key back into `(path, attribute)`.
pub fn decode(key: &[u8]) -> Result<(TreePath, Attr), SummaError> {
    if key.len() < 2 || key[key.len() - 2] != ATTR_MARK {
        return Err(SummaError::BadRequest("malformed stored key".into()));
    }
    let attr = Attr::from_byte(key[key.len() - 1])
        .ok_or_else(|| SummaError::BadRequest("unknown attribute byte in stored key".into()))?;
    let body = &key[..key.len() - 2];

    let mut segments = Vec::new();
    if !body.is_empty() {
        if body[0] != SEG_SEP {
            return Err(SummaError::BadRequest("malformed stored key".into()));
        }
        let mut current = Vec::new();
        let mut iter = body[1..].iter();
        while let Some(&b) = iter.next() {
            match b {
                SEG_SEP => {
                    segments.push(current.split_off(0));
                }
                ESCAPE => {
                    current.push(b);
                    if let Some(&escaped) = iter.next() {
                        current.push(escaped);
                    }
                }
                other => current.push(other),
            }
        }
        segments.push(current);
    }

    let segments = segments
        .iter()
        .map(|s| unescape(s))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((TreePath { segments }, attr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_slashes() {
        let p = TreePath::parse("//fruits///banana/").unwrap();
        assert_eq!(p.segments(), ["fruits", "banana"]);
        assert_eq!(p.to_string(), "/fruits/banana");
    }

    #[test]
    fn parse_rejects_traversal() {
        assert!(TreePath::parse("/fruits/../etc").is_err());
    }

    #[test]
    fn root_displays_as_slash() {
        assert_eq!(TreePath::root().to_string(), "/");
        assert!(TreePath::parse("/").unwrap().is_root());
    }

    #[test]
    fn encode_decode_round_trip() {
        for raw in ["/", "/a", "/fruits/banana", "/x/_local/ckpt", "/k\u{1}weird"] {
            let p = TreePath::parse(raw).unwrap();
            for attr in [Attr::Value, Attr::Rev, Attr::Seq, Attr::Deleted] {
                let key = encode(&p, attr);
                let (decoded, decoded_attr) = decode(&key).unwrap();
                assert_eq!(decoded, p, "path {raw}");
                assert_eq!(decoded_attr, attr);
            }
        }
    }

    #[test]
    fn attributes_precede_children() {
        let node = TreePath::parse("/a").unwrap();
        let child = node.child("b");
        assert!(encode(&node, Attr::Value) < encode(&child, Attr::Value));
        assert!(encode(&node, Attr::Deleted) < encode(&child, Attr::Rev));
    }

    #[test]
    fn siblings_sort_by_raw_segment() {
        let parent = TreePath::parse("/p").unwrap();
        let mut names = vec!["b", "a", "ab", "a\u{1}x", "z"];
        let mut keys: Vec<(Vec<u8>, &str)> = names
            .iter()
            .map(|n| (encode(&parent.child(n), Attr::Rev), *n))
            .collect();
        keys.sort();
        names.sort_unstable();
        let sorted: Vec<&str> = keys.into_iter().map(|(_, n)| n).collect();
        assert_eq!(sorted, names);
    }

    #[test]
    fn subtree_range_excludes_extending_sibling() {
        let a = TreePath::parse("/a").unwrap();
        let ab = TreePath::parse("/ab").unwrap();
        let (start, end) = subtree_range(&a);
        let own = encode(&a, Attr::Value);
        let deep = encode(&a.child("x").child("y"), Attr::Seq);
        let sibling = encode(&ab, Attr::Value);
        assert!(own >= start && own < end);
        assert!(deep >= start && deep < end);
        assert!(sibling >= end);
    }

    #[test]
    fn subtree_range_at_root_covers_everything() {
        let (start, end) = subtree_range(&TreePath::root());
        let root_attr = encode(&TreePath::root(), Attr::Rev);
        let deep = encode(&TreePath::parse("/x/y/z").unwrap(), Attr::Value);
        assert!(root_attr >= start && root_attr < end);
        assert!(deep >= start && deep < end);
    }

    #[test]
    fn attr_suffix_splits() {
        let p = TreePath::parse("/fruits/banana/_deleted").unwrap();
        let (base, attr) = p.split_attr_suffix();
        assert_eq!(base.to_string(), "/fruits/banana");
        assert_eq!(attr, Some(Attr::Deleted));

        let plain = TreePath::parse("/fruits").unwrap();
        let (base, attr) = plain.split_attr_suffix();
        assert_eq!(base, plain);
        assert_eq!(attr, None);
    }

    #[test]
    fn local_namespace_detection() {
        assert!(TreePath::parse("/db/_local/checkpoint").unwrap().is_local());
        assert!(!TreePath::parse("/db/docs").unwrap().is_local());
    }
}
