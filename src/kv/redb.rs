// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! redb-backed persistent store.
//!
//! One database file, one table per [`Keyspace`]. A [`WriteBatch`] maps onto
//! a single redb write transaction, so batches are atomic and crash-safe;
//! readers run on MVCC snapshots and never see a partial commit.

use std::path::Path;

use redb::{Database, Durability, ReadableTable, TableDefinition};
use tracing::debug;

use super::traits::{Keyspace, KvError, KvStore, WriteBatch};

const TREE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tree");
const CHANGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("changes");
const LOCAL: TableDefinition<&[u8], &[u8]> = TableDefinition::new("local");

fn table_def(ks: Keyspace) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    match ks {
        Keyspace::Tree => TREE,
        Keyspace::Changes => CHANGES,
        Keyspace::Local => LOCAL,
    }
}

pub struct RedbKv {
    db: Database,
    durable: bool,
}

impl std::fmt::Debug for RedbKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbKv")
            .field("durable", &self.durable)
            .finish_non_exhaustive()
    }
}

impl RedbKv {
    /// Open or create the database file. Tables are created up front so
    /// reads never race table creation.
    pub fn open(path: impl AsRef<Path>, durable: bool) -> Result<Self, KvError> {
        if let Some(dir) = path.as_ref().parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let db = Database::create(path.as_ref())?;

        let txn = db.begin_write()?;
        for ks in Keyspace::ALL {
            txn.open_table(table_def(ks))?;
        }
        txn.commit()?;

        debug!(path = %path.as_ref().display(), durable, "opened redb store");
        Ok(Self { db, durable })
    }
}

impl KvStore for RedbKv {
    fn get(&self, ks: Keyspace, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table_def(ks))?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    fn scan_range(
        &self,
        ks: Keyspace,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table_def(ks))?;
        let mut out = Vec::new();
        match end {
            Some(end) => {
                for entry in table.range(start..end)? {
                    let (k, v) = entry?;
                    out.push((k.value().to_vec(), v.value().to_vec()));
                }
            }
            None => {
                for entry in table.range(start..)? {
                    let (k, v) = entry?;
                    out.push((k.value().to_vec(), v.value().to_vec()));
                }
            }
        }
        Ok(out)
    }

    fn last_key(&self, ks: Keyspace) -> Result<Option<Vec<u8>>, KvError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table_def(ks))?;
        let result = table.last()?.map(|(k, _)| k.value().to_vec());
        Ok(result)
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), KvError> {
        let mut txn = self.db.begin_write()?;
        if !self.durable {
            txn.set_durability(Durability::Eventual);
        }
        {
            for (ks, ops) in batch.into_ops() {
                let mut table = txn.open_table(table_def(ks))?;
                for (key, value) in ops.puts {
                    table.insert(key.as_slice(), value.as_slice())?;
                }
                for key in ops.deletes {
                    table.remove(key.as_slice())?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn flush(&self) -> Result<(), KvError> {
        // Eventual-durability commits are persisted by a durable no-op commit.
        let txn = self.db.begin_write()?;
        txn.commit()?;
        Ok(())
    }
}
