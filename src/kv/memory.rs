//! In-memory ordered store for tests and ephemeral databases.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use super::traits::{Keyspace, KvError, KvStore, WriteBatch};

/// BTreeMap-backed [`KvStore`]. Batches apply under one write lock, so
/// readers never observe a half-applied batch.
#[derive(Debug, Default)]
pub struct MemoryKv {
    tables: RwLock<BTreeMap<Keyspace, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored keys, for tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryKv {
    fn get(&self, ks: Keyspace, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self
            .tables
            .read()
            .get(&ks)
            .and_then(|t| t.get(key).cloned()))
    }

    fn scan_range(
        &self,
        ks: Keyspace,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let tables = self.tables.read();
        let Some(table) = tables.get(&ks) else {
            return Ok(Vec::new());
        };
        let upper = match end {
            Some(e) => Bound::Excluded(e.to_vec()),
            None => Bound::Unbounded,
        };
        Ok(table
            .range((Bound::Included(start.to_vec()), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn last_key(&self, ks: Keyspace) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self
            .tables
            .read()
            .get(&ks)
            .and_then(|t| t.keys().next_back().cloned()))
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), KvError> {
        let mut tables = self.tables.write();
        for (ks, ops) in batch.into_ops() {
            let table = tables.entry(ks).or_default();
            for (key, value) in ops.puts {
                table.insert(key, value);
            }
            for key in ops.deletes {
                table.remove(&key);
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), KvError> {
        Ok(())
    }
}
