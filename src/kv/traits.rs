//! Ordered key-value store abstraction.
//!
//! The tree core only needs an embedded store with ordered byte keys, range
//! scans and atomic multi-table write batches. Everything else (revisions,
//! sequences, the change feed) is built on top.

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors from the KV seam. Surface as `Internal` at the HTTP boundary.
#[derive(Error, Debug)]
pub enum KvError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),
}

/// The ordered tables the core writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Keyspace {
    /// Encoded tree paths and their attributes.
    Tree,
    /// Change log, keyed by sequence.
    Changes,
    /// `_local/` documents, outside the change feed.
    Local,
}

impl Keyspace {
    pub const ALL: [Keyspace; 3] = [Keyspace::Tree, Keyspace::Changes, Keyspace::Local];

    #[must_use]
    pub fn table_name(self) -> &'static str {
        match self {
            Keyspace::Tree => "tree",
            Keyspace::Changes => "changes",
            Keyspace::Local => "local",
        }
    }
}

/// Puts and deletes for one keyspace within a batch.
#[derive(Debug, Default)]
pub struct TableOps {
    pub puts: Vec<(Vec<u8>, Vec<u8>)>,
    pub deletes: Vec<Vec<u8>>,
}

/// An atomic multi-keyspace write. Either every operation lands or none do.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: BTreeMap<Keyspace, TableOps>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, ks: Keyspace, key: Vec<u8>, value: Vec<u8>) {
        self.ops.entry(ks).or_default().puts.push((key, value));
    }

    pub fn delete(&mut self, ks: Keyspace, key: Vec<u8>) {
        self.ops.entry(ks).or_default().deletes.push(key);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops
            .values()
            .all(|t| t.puts.is_empty() && t.deletes.is_empty())
    }

    /// Total number of puts and deletes across keyspaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops
            .values()
            .map(|t| t.puts.len() + t.deletes.len())
            .sum()
    }

    pub(crate) fn into_ops(self) -> BTreeMap<Keyspace, TableOps> {
        self.ops
    }
}

/// An embedded ordered byte-key store.
///
/// Reads may observe a snapshot; `apply` commits a whole [`WriteBatch`]
/// atomically. Implementations must never expose a partial batch.
pub trait KvStore: Send + Sync {
    fn get(&self, ks: Keyspace, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// Ascending scan over `[start, end)`; `end = None` scans to the end of
    /// the keyspace.
    fn scan_range(
        &self,
        ks: Keyspace,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;

    /// Largest key in the keyspace, if any.
    fn last_key(&self, ks: Keyspace) -> Result<Option<Vec<u8>>, KvError>;

    /// Commit a batch atomically.
    fn apply(&self, batch: WriteBatch) -> Result<(), KvError>;

    /// Make previously committed batches durable.
    fn flush(&self) -> Result<(), KvError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_tracks_len_across_keyspaces() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());

        batch.put(Keyspace::Tree, b"a".to_vec(), b"1".to_vec());
        batch.put(Keyspace::Changes, b"b".to_vec(), b"2".to_vec());
        batch.delete(Keyspace::Tree, b"c".to_vec());

        assert!(!batch.is_empty());
        assert_eq!(batch.len(), 3);
    }
}
