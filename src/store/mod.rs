// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tree store coordinator.
//!
//! [`SummaDb`] is the process-wide handle that ties the pieces together:
//! the ordered KV backend, the revision discipline, the global sequence
//! counter and the change log.
//!
//! # Lifecycle
//!
//! ```text
//! erase (optional) → open → get/save/replace/delete/... → close
//! ```
//!
//! # Write model
//!
//! Every mutating operation builds exactly one [`WriteBatch`](crate::kv::WriteBatch)
//! and commits it while holding the write mutex, so the global sequence is
//! gap-free and two concurrent writes linearize at the commit point. Reads
//! go straight to the KV backend and observe whole batches only.
//!
//! # Example
//!
//! ```
//! use summadb::{SummaConfig, SummaDb, TreePath};
//!
//! let db = SummaDb::open(SummaConfig::default()).unwrap();
//! let path = TreePath::parse("/fruits/banana/colour").unwrap();
//! db.save_value_at(&path, b"\"yellow\"".to_vec()).unwrap();
//! assert_eq!(db.get_value_at(&path).unwrap(), b"\"yellow\"");
//! ```

mod changes;
mod local;
mod read;
mod write;

pub use changes::Change;
pub use read::ChildMeta;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::SummaConfig;
use crate::error::{Result, SummaError};
use crate::kv::{Keyspace, KvStore, MemoryKv, RedbKv, WriteBatch};
use crate::path::{self, Attr, TreePath};
use crate::revision::Rev;

/// Database info served for `GET /db/`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DbInfo {
    pub db_name: String,
    pub update_seq: u64,
    pub instance_start_time: u64,
}

/// The tree database handle.
///
/// Cheap to share behind an `Arc`; all operations take `&self`.
pub struct SummaDb {
    /// Ordered KV backend.
    pub(super) kv: Arc<dyn KvStore>,

    pub(super) config: SummaConfig,

    /// Serializes write batches and sequence assignment.
    pub(super) write_lock: Mutex<()>,

    /// Last committed global sequence.
    pub(super) update_seq: AtomicU64,

    /// Process start, reported in database info.
    start_time: SystemTime,
}

impl std::fmt::Debug for SummaDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummaDb")
            .field("update_seq", &self.update_seq.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl SummaDb {
    /// Open the database described by `config`: redb-backed when `db_path`
    /// is set, in-memory otherwise.
    pub fn open(config: SummaConfig) -> Result<Self> {
        let kv: Arc<dyn KvStore> = match &config.db_path {
            Some(path) => Arc::new(RedbKv::open(path, config.durable_writes)?),
            None => Arc::new(MemoryKv::new()),
        };
        Self::with_store(kv, config)
    }

    /// Open on an existing KV backend (tests inject [`MemoryKv`] here).
    pub fn with_store(kv: Arc<dyn KvStore>, config: SummaConfig) -> Result<Self> {
        // The change log's last key is the highest committed sequence.
        let update_seq = match kv.last_key(Keyspace::Changes)? {
            Some(key) if key.len() >= 8 => {
                u64::from_be_bytes(key[..8].try_into().expect("checked length"))
            }
            _ => 0,
        };
        info!(update_seq, "database opened");
        crate::metrics::set_update_seq(update_seq);

        Ok(Self {
            kv,
            config,
            write_lock: Mutex::new(()),
            update_seq: AtomicU64::new(update_seq),
            start_time: SystemTime::now(),
        })
    }

    /// Flush and close. Batches already committed are durable afterwards.
    pub fn close(self) -> Result<()> {
        self.kv.flush()?;
        info!("database closed");
        Ok(())
    }

    /// Remove the store file at `path`. Only legal before [`SummaDb::open`];
    /// missing files are fine.
    pub fn erase(path: &str) -> Result<()> {
        if Path::new(path).exists() {
            std::fs::remove_file(path).map_err(crate::kv::KvError::from)?;
            info!(path, "erased database file");
        }
        Ok(())
    }

    /// Current value of the global write counter.
    #[must_use]
    pub fn global_update_seq(&self) -> u64 {
        self.update_seq.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn config(&self) -> &SummaConfig {
        &self.config
    }

    /// Instance start time, epoch seconds.
    #[must_use]
    pub fn instance_start_time(&self) -> u64 {
        self.start_time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Database info for the subtree rooted at `p` (every subtree is a
    /// database).
    pub fn info(&self, p: &TreePath) -> Result<DbInfo> {
        Ok(DbInfo {
            db_name: p.to_string(),
            update_seq: self.last_seq_at(p)?,
            instance_start_time: self.instance_start_time(),
        })
    }

    // --- Revision engine ---

    /// Current rev of a path; [`Rev::null`] when never written.
    pub fn get_rev(&self, p: &TreePath) -> Result<Rev> {
        match self.kv.get(Keyspace::Tree, &path::encode(p, Attr::Rev))? {
            Some(bytes) => Rev::from_bytes(&bytes),
            None => Ok(Rev::null()),
        }
    }

    /// Record that this node has seen `rev` without changing its winning
    /// value. Replication calls this when an inbound rev loses to the local
    /// winner; `_revs_diff` then stops reporting the rev as missing.
    pub fn acknowledge_rev_for(&self, p: &TreePath, rev: &Rev) -> Result<()> {
        const MAX_ACKNOWLEDGED: usize = 1000;

        let _guard = self.write_lock.lock();
        let mut seen = self.seen_revs(p)?;
        let rev = rev.to_string();
        if seen.contains(&rev) {
            return Ok(());
        }
        seen.push(rev);
        if seen.len() > MAX_ACKNOWLEDGED {
            let excess = seen.len() - MAX_ACKNOWLEDGED;
            seen.drain(..excess);
        }

        let mut batch = WriteBatch::new();
        batch.put(
            Keyspace::Tree,
            path::encode(p, Attr::RevHistory),
            serde_json::to_vec(&seen)
                .map_err(|e| SummaError::BadRequest(format!("unencodable rev list: {e}")))?,
        );
        self.kv.apply(batch)?;
        debug!(path = %p, "acknowledged non-winning rev");
        Ok(())
    }

    /// Revs this node has seen besides the current one.
    pub fn seen_revs(&self, p: &TreePath) -> Result<Vec<String>> {
        match self
            .kv
            .get(Keyspace::Tree, &path::encode(p, Attr::RevHistory))?
        {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| SummaError::BadRequest(format!("corrupt rev list: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    /// Reject writes into reserved (underscore) segments; those namespaces
    /// have their own operations.
    pub(super) fn guard_writable(&self, p: &TreePath) -> Result<()> {
        if p.has_reserved_segment() {
            return Err(SummaError::BadRequest(format!(
                "cannot write into reserved path {p}"
            )));
        }
        Ok(())
    }
}
