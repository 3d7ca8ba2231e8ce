// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The change log.
//!
//! Every committed batch appends one record keyed by its sequence, naming
//! the path the operation targeted, and stamps the same seq on the `s`
//! attribute of every touched path. A subtree's last seq is therefore a
//! single point read, and the feed for any subtree is a range scan over
//! the log tail.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SummaError};
use crate::kv::{Keyspace, WriteBatch};
use crate::path::{self, Attr, TreePath};

use super::SummaDb;

/// One emitted change: the newest write to a path, as seen by a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub seq: u64,
    pub path: String,
    pub rev: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// Stored log entry; the seq lives in the key.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct ChangeRecord {
    pub path: String,
    pub rev: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// Log key: the batch's sequence, big-endian so the log scans in order.
pub(super) fn change_key(seq: u64) -> Vec<u8> {
    seq.to_be_bytes().to_vec()
}

impl SummaDb {
    /// Largest seq recorded at or under `p`; 0 when nothing was ever
    /// written there.
    pub fn last_seq_at(&self, p: &TreePath) -> Result<u64> {
        match self.kv.get(Keyspace::Tree, &path::encode(p, Attr::Seq))? {
            Some(bytes) if bytes.len() == 8 => {
                Ok(u64::from_be_bytes(bytes[..].try_into().expect("checked length")))
            }
            Some(_) => Err(SummaError::BadRequest("corrupt seq attribute".into())),
            None => Ok(0),
        }
    }

    /// Changes with `seq > since` at or under `p`, ascending, one entry per
    /// path (duplicates coalesce to the newest seq).
    #[tracing::instrument(skip(self), fields(path = %p, since))]
    pub fn list_changes_at(&self, p: &TreePath, since: u64) -> Result<Vec<Change>> {
        let start = since
            .checked_add(1)
            .map(|s| s.to_be_bytes().to_vec())
            .unwrap_or_else(|| vec![0xff; 9]);

        let mut newest: BTreeMap<TreePath, Change> = BTreeMap::new();
        for (key, value) in self.kv.scan_range(Keyspace::Changes, &start, None)? {
            if key.len() != 8 {
                return Err(SummaError::BadRequest("corrupt change key".into()));
            }
            let seq = u64::from_be_bytes(key[..8].try_into().expect("checked length"));
            let record: ChangeRecord = serde_json::from_slice(&value)
                .map_err(|e| SummaError::BadRequest(format!("corrupt change record: {e}")))?;
            let node = TreePath::parse(&record.path)?;
            if !node.is_under(p) {
                continue;
            }
            // Ascending scan: a later entry for the same path wins.
            newest.insert(
                node,
                Change {
                    seq,
                    path: record.path,
                    rev: record.rev,
                    deleted: record.deleted,
                },
            );
        }

        let mut changes: Vec<Change> = newest.into_values().collect();
        changes.sort_by_key(|c| c.seq);
        crate::metrics::record_changes_served(changes.len());
        Ok(changes)
    }

    /// Drop log entries with `seq < below`. The tail above survives, so
    /// `last_seq_at` never moves and the counter restores on reopen.
    pub fn compact_changes(&self, below: u64) -> Result<usize> {
        let _guard = self.write_lock.lock();

        // Keep the newest entry so the seq counter survives a reopen.
        let below = below.min(self.global_update_seq());
        let end = below.to_be_bytes().to_vec();

        let mut batch = WriteBatch::new();
        for (key, _) in self.kv.scan_range(Keyspace::Changes, &[], Some(&end))? {
            batch.delete(Keyspace::Changes, key);
        }
        let dropped = batch.len();
        if dropped > 0 {
            self.kv.apply(batch)?;
            debug!(below, dropped, "compacted change log");
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SummaConfig;

    fn open() -> SummaDb {
        SummaDb::open(SummaConfig::default()).unwrap()
    }

    fn p(raw: &str) -> TreePath {
        TreePath::parse(raw).unwrap()
    }

    #[test]
    fn seq_is_gap_free_and_monotonic() {
        let db = open();
        for i in 0..5u8 {
            db.save_value_at(&p(&format!("/docs/d{i}")), b"1".to_vec())
                .unwrap();
        }
        assert_eq!(db.global_update_seq(), 5);
        assert_eq!(db.last_seq_at(&p("/")).unwrap(), 5);
        assert_eq!(db.last_seq_at(&p("/docs/d0")).unwrap(), 1);
    }

    #[test]
    fn subtree_last_seq_reflects_descendant_writes() {
        let db = open();
        db.save_value_at(&p("/a/x"), b"1".to_vec()).unwrap();
        db.save_value_at(&p("/b/y"), b"2".to_vec()).unwrap();

        assert_eq!(db.last_seq_at(&p("/a")).unwrap(), 1);
        assert_eq!(db.last_seq_at(&p("/b")).unwrap(), 2);
        assert_eq!(db.last_seq_at(&p("/")).unwrap(), 2);
    }

    #[test]
    fn changes_filter_to_the_subtree() {
        let db = open();
        db.save_value_at(&p("/a/x"), b"1".to_vec()).unwrap();
        db.save_value_at(&p("/b/y"), b"2".to_vec()).unwrap();

        let changes = db.list_changes_at(&p("/a"), 0).unwrap();
        assert!(changes.iter().all(|c| c.path.starts_with("/a")));
        assert!(changes.iter().any(|c| c.path == "/a/x"));
        assert!(!changes.iter().any(|c| c.path.starts_with("/b")));
    }

    #[test]
    fn changes_coalesce_to_newest_seq() {
        let db = open();
        db.save_value_at(&p("/doc"), b"1".to_vec()).unwrap();
        db.save_value_at(&p("/doc"), b"2".to_vec()).unwrap();

        let changes = db.list_changes_at(&p("/"), 0).unwrap();
        let doc_changes: Vec<_> = changes.iter().filter(|c| c.path == "/doc").collect();
        assert_eq!(doc_changes.len(), 1);
        assert_eq!(doc_changes[0].seq, 2);
    }

    #[test]
    fn since_excludes_older_changes() {
        let db = open();
        db.save_value_at(&p("/a"), b"1".to_vec()).unwrap();
        let cut = db.global_update_seq();
        db.save_value_at(&p("/b"), b"2".to_vec()).unwrap();

        let changes = db.list_changes_at(&p("/"), cut).unwrap();
        assert!(changes.iter().all(|c| c.seq > cut));
        assert!(changes.iter().any(|c| c.path == "/b"));
        assert!(!changes.iter().any(|c| c.path == "/a"));
    }

    #[test]
    fn deletes_appear_in_the_feed() {
        let db = open();
        db.save_value_at(&p("/doc"), b"1".to_vec()).unwrap();
        db.delete_at(&p("/doc")).unwrap();

        let changes = db.list_changes_at(&p("/"), 0).unwrap();
        let doc = changes.iter().find(|c| c.path == "/doc").unwrap();
        assert!(doc.deleted);
    }

    #[test]
    fn compaction_preserves_the_counter() {
        let db = open();
        for i in 0..4u8 {
            db.save_value_at(&p(&format!("/d{i}")), b"1".to_vec()).unwrap();
        }
        let dropped = db.compact_changes(u64::MAX).unwrap();
        assert!(dropped > 0);
        assert_eq!(db.global_update_seq(), 4);
        // The newest batch is still in the log.
        assert!(!db.list_changes_at(&p("/"), 0).unwrap().is_empty());
    }
}
