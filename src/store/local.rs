// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `_local/` documents.
//!
//! Replicators store their checkpoints under `_local/`. These documents
//! live in their own keyspace with a one-generation-per-save rev and no
//! hash discipline (replicators only compare revs for equality). They
//! never enter the change log and never touch ancestor revs.

use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SummaError};
use crate::kv::{Keyspace, WriteBatch};
use crate::path::{self, Attr, TreePath};
use crate::revision::Rev;

use super::SummaDb;

impl SummaDb {
    /// Current rev of a local doc; [`Rev::null`] when absent.
    pub fn get_local_doc_rev(&self, p: &TreePath) -> Result<Rev> {
        match self.kv.get(Keyspace::Local, &path::encode(p, Attr::Rev))? {
            Some(bytes) => Rev::from_bytes(&bytes),
            None => Ok(Rev::null()),
        }
    }

    /// The stored local doc with its `_rev` injected.
    pub fn get_local_doc_at(&self, p: &TreePath) -> Result<Value> {
        let bytes = self
            .kv
            .get(Keyspace::Local, &path::encode(p, Attr::Value))?
            .ok_or(SummaError::NotFound)?;
        let mut doc: Value = serde_json::from_slice(&bytes)
            .map_err(|e| SummaError::BadRequest(format!("corrupt local doc: {e}")))?;
        if let Value::Object(map) = &mut doc {
            let rev = self.get_local_doc_rev(p)?;
            map.insert("_rev".to_string(), Value::String(rev.to_string()));
        }
        Ok(doc)
    }

    /// Store a local doc, bumping its rev by one generation. The doc's own
    /// `_id`/`_rev` fields are not persisted.
    #[tracing::instrument(skip(self, doc), fields(path = %p))]
    pub fn save_local_doc_at(&self, p: &TreePath, doc: &Value) -> Result<Rev> {
        if !p.is_local() {
            return Err(SummaError::BadRequest(format!(
                "{p} is not in the _local namespace"
            )));
        }
        let Value::Object(map) = doc else {
            return Err(SummaError::InvalidValue("local doc must be an object".into()));
        };

        let mut stored = map.clone();
        stored.remove("_id");
        stored.remove("_rev");

        let _guard = self.write_lock.lock();
        let current = self.get_local_doc_rev(p)?;
        let next = Rev::from_generation(current.generation() + 1);

        let mut batch = WriteBatch::new();
        batch.put(
            Keyspace::Local,
            path::encode(p, Attr::Value),
            serde_json::to_vec(&stored)
                .map_err(|e| SummaError::InvalidValue(format!("unencodable local doc: {e}")))?,
        );
        batch.put(
            Keyspace::Local,
            path::encode(p, Attr::Rev),
            next.to_string().into_bytes(),
        );
        self.kv.apply(batch)?;

        debug!(path = %p, rev = %next, "saved local doc");
        crate::metrics::record_operation("save_local", "ok");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SummaConfig;
    use serde_json::json;

    fn open() -> SummaDb {
        SummaDb::open(SummaConfig::default()).unwrap()
    }

    fn p(raw: &str) -> TreePath {
        TreePath::parse(raw).unwrap()
    }

    #[test]
    fn absent_local_doc_has_null_rev() {
        let db = open();
        let rev = db.get_local_doc_rev(&p("/db/_local/ckpt")).unwrap();
        assert!(rev.is_null());
        assert!(matches!(
            db.get_local_doc_at(&p("/db/_local/ckpt")),
            Err(SummaError::NotFound)
        ));
    }

    #[test]
    fn save_bumps_one_generation_per_call() {
        let db = open();
        let path = p("/db/_local/ckpt");

        let r1 = db.save_local_doc_at(&path, &json!({"seq": 10})).unwrap();
        assert_eq!(r1.to_string(), "1-0");
        let r2 = db.save_local_doc_at(&path, &json!({"seq": 20})).unwrap();
        assert_eq!(r2.to_string(), "2-0");

        let doc = db.get_local_doc_at(&path).unwrap();
        assert_eq!(doc["seq"], json!(20));
        assert_eq!(doc["_rev"], json!("2-0"));
    }

    #[test]
    fn local_saves_never_enter_the_change_log() {
        let db = open();
        db.save_local_doc_at(&p("/db/_local/ckpt"), &json!({"seq": 1}))
            .unwrap();

        assert_eq!(db.global_update_seq(), 0);
        assert!(db.list_changes_at(&p("/"), 0).unwrap().is_empty());
        // Tree revs untouched too.
        assert!(db.get_rev(&p("/db")).unwrap().is_null());
    }

    #[test]
    fn save_outside_local_namespace_is_rejected() {
        let db = open();
        assert!(matches!(
            db.save_local_doc_at(&p("/db/doc"), &json!({})),
            Err(SummaError::BadRequest(_))
        ));
    }
}
