// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Revision strings and the bump discipline.
//!
//! Every path carries a revision `<gen>-<hex32>`. The generation strictly
//! increases on every write to that exact path; the hash is a deterministic
//! digest over the previous rev, the new value bytes and a digest of the
//! child revs touched in the same batch. Two nodes that apply the same
//! logical sequence of writes converge to the same rev.
//!
//! The winner rule on conflicting revs is higher generation first, ties
//! broken by the hash, which is close enough to the CouchDB rule to
//! interoperate with PouchDB replication.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::SummaError;

/// A parsed revision.
///
/// The sentinel [`Rev::null`] (`0-0`) means "never written".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rev {
    gen: u64,
    hash: String,
}

impl Rev {
    /// The never-written sentinel, `0-0`.
    #[must_use]
    pub fn null() -> Self {
        Self {
            gen: 0,
            hash: "0".to_string(),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.gen == 0
    }

    /// A rev with no hash discipline, `<gen>-0`. Local docs use these;
    /// replicators only compare them for equality.
    #[must_use]
    pub fn from_generation(gen: u64) -> Self {
        Self {
            gen,
            hash: "0".to_string(),
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.gen
    }

    /// Parse `<gen>-<hash>`. Malformed input is a `BadRequest`.
    pub fn parse(s: &str) -> Result<Self, SummaError> {
        let (gen, hash) = s
            .split_once('-')
            .ok_or_else(|| SummaError::BadRequest(format!("malformed rev: {s}")))?;
        let gen: u64 = gen
            .parse()
            .map_err(|_| SummaError::BadRequest(format!("malformed rev generation: {s}")))?;
        if hash.is_empty() {
            return Err(SummaError::BadRequest(format!("malformed rev: {s}")));
        }
        Ok(Self {
            gen,
            hash: hash.to_string(),
        })
    }

    /// Parse stored rev bytes; absent storage maps to [`Rev::null`] upstream.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SummaError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|_| SummaError::BadRequest("stored rev is not UTF-8".into()))?;
        Self::parse(s)
    }

    /// Compute the successor rev for a write.
    ///
    /// `value` is the node's scalar bytes after the write (empty when none),
    /// `child_digest` summarizes the child revs computed earlier in the same
    /// batch. Both feed the hash so identical logical histories converge.
    #[must_use]
    pub fn bump(&self, value: &[u8], child_digest: &[u8; 32]) -> Rev {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(value);
        hasher.update(b"|");
        hasher.update(child_digest);
        let digest = hasher.finalize();
        Rev {
            gen: self.gen + 1,
            hash: hex::encode(&digest[..16]),
        }
    }
}

impl Ord for Rev {
    fn cmp(&self, other: &Self) -> Ordering {
        self.gen
            .cmp(&other.gen)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for Rev {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Rev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.gen, self.hash)
    }
}

/// Digest over the child revs touched in one batch.
///
/// Children are framed as `segment ':' rev ';'` in segment order, so the
/// digest is deterministic regardless of write order inside the batch.
#[must_use]
pub fn child_digest(children: &BTreeMap<String, Rev>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for (segment, rev) in children {
        hasher.update(segment.as_bytes());
        hasher.update(b":");
        hasher.update(rev.to_string().as_bytes());
        hasher.update(b";");
    }
    hasher.finalize().into()
}

/// Digest input for a node with no touched children.
#[must_use]
pub fn empty_child_digest() -> [u8; 32] {
    child_digest(&BTreeMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_rev_round_trips() {
        let null = Rev::null();
        assert_eq!(null.to_string(), "0-0");
        assert!(null.is_null());
        assert_eq!(Rev::parse("0-0").unwrap(), null);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Rev::parse("nodash").is_err());
        assert!(Rev::parse("x-abc").is_err());
        assert!(Rev::parse("3-").is_err());
    }

    #[test]
    fn bump_increments_generation() {
        let r1 = Rev::null().bump(b"\"a\"", &empty_child_digest());
        assert_eq!(r1.generation(), 1);
        let r2 = r1.bump(b"\"b\"", &empty_child_digest());
        assert_eq!(r2.generation(), 2);
        assert!(r2 > r1);
    }

    #[test]
    fn bump_is_deterministic() {
        let digest = empty_child_digest();
        let a = Rev::null().bump(b"\"v\"", &digest);
        let b = Rev::null().bump(b"\"v\"", &digest);
        assert_eq!(a, b);

        let c = Rev::null().bump(b"\"other\"", &digest);
        assert_ne!(a, c);
    }

    #[test]
    fn ordering_is_generation_first() {
        let old = Rev::parse("2-ffffffff").unwrap();
        let new = Rev::parse("10-00000000").unwrap();
        assert!(new > old, "generation compares numerically, not as text");

        let a = Rev::parse("3-aaaa").unwrap();
        let b = Rev::parse("3-bbbb").unwrap();
        assert!(b > a, "ties break on the hash");
    }

    #[test]
    fn child_digest_ignores_insertion_order() {
        let r = Rev::parse("1-abc").unwrap();
        let mut forward = BTreeMap::new();
        forward.insert("a".to_string(), r.clone());
        forward.insert("b".to_string(), r.clone());
        let mut reverse = BTreeMap::new();
        reverse.insert("b".to_string(), r.clone());
        reverse.insert("a".to_string(), r);
        assert_eq!(child_digest(&forward), child_digest(&reverse));
        assert_ne!(child_digest(&forward), empty_child_digest());
    }
}
