// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mutating tree operations.
//!
//! Each public operation builds one [`WriteBatch`] covering the target
//! paths, every descendant it tombstones, and every ancestor up to the
//! root, then commits it under the write mutex with the next global
//! sequence. Child revs are computed before their parents so the parent's
//! child-rev digest is well defined.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SummaError};
use crate::kv::{Keyspace, WriteBatch};
use crate::path::{self, Attr, TreePath};
use crate::revision::{child_digest, Rev};

use super::changes::ChangeRecord;
use super::SummaDb;

/// What happens to a node's scalar in this batch.
#[derive(Debug, Clone)]
enum ValueOp {
    /// Leave the stored scalar alone (ancestors, pure subtree containers).
    Keep,
    /// Store new scalar bytes.
    Set(Vec<u8>),
    /// Remove the scalar (tombstones).
    Clear,
}

/// One touched path inside a batch.
#[derive(Debug)]
struct PendingWrite {
    value: ValueOp,
    /// `Some(true)` places a tombstone, `Some(false)` clears one.
    deleted: Option<bool>,
    /// Adopt this rev verbatim instead of bumping (replication pushes).
    adopt_rev: Option<Rev>,
}

impl PendingWrite {
    fn set(bytes: Vec<u8>) -> Self {
        Self {
            value: ValueOp::Set(bytes),
            deleted: Some(false),
            adopt_rev: None,
        }
    }

    fn tombstone() -> Self {
        Self {
            value: ValueOp::Clear,
            deleted: Some(true),
            adopt_rev: None,
        }
    }

    /// Bump the rev and clear any tombstone, touching nothing else.
    fn revive() -> Self {
        Self {
            value: ValueOp::Keep,
            deleted: Some(false),
            adopt_rev: None,
        }
    }
}

type Touched = BTreeMap<TreePath, PendingWrite>;

fn is_scalar(v: &Value) -> bool {
    matches!(
        v,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

impl SummaDb {
    /// Write a raw JSON scalar at `p`, bumping revs at `p` and every
    /// ancestor and stamping the batch's sequence on all of them.
    #[tracing::instrument(skip(self, bytes), fields(path = %p))]
    pub fn save_value_at(&self, p: &TreePath, bytes: Vec<u8>) -> Result<Rev> {
        self.guard_writable(p)?;
        let parsed: Value = serde_json::from_slice(&bytes)
            .map_err(|e| SummaError::InvalidValue(format!("not JSON: {e}")))?;
        if !is_scalar(&parsed) {
            return Err(SummaError::InvalidValue(
                "value must be a string, number, boolean or null".into(),
            ));
        }

        let _guard = self.write_lock.lock();
        let mut touched = Touched::new();
        touched.insert(p.clone(), PendingWrite::set(bytes));
        let revs = self.commit_locked("save_value", touched, p)?;
        Ok(revs[p].clone())
    }

    /// Merge a nested mapping into the node at `p`.
    ///
    /// Scalar leaves set that path's value, explicit `null` tombstones the
    /// subtree, nested mappings recurse. `_val` addresses a level's own
    /// scalar, a truthy `_deleted` tombstones the level, other reserved
    /// keys are ignored. Paths the tree does not mention stay untouched.
    #[tracing::instrument(skip(self, tree), fields(path = %p))]
    pub fn save_tree_at(&self, p: &TreePath, tree: &Value) -> Result<Rev> {
        self.guard_writable(p)?;
        let Value::Object(map) = tree else {
            return Err(SummaError::InvalidValue("tree must be a JSON object".into()));
        };

        let _guard = self.write_lock.lock();
        let mut touched = Touched::new();
        touched.insert(p.clone(), PendingWrite::revive());
        self.merge_tree(p, map, &mut touched)?;
        let revs = self.commit_locked("save_tree", touched, p)?;
        Ok(revs[p].clone())
    }

    /// Replace the subtree at `p` with `tree`: existing live children absent
    /// from `tree` are tombstoned first, then `tree` merges as in
    /// [`save_tree_at`](Self::save_tree_at).
    ///
    /// With `preserve_rev` and a `_rev` inside `tree`, that rev is adopted
    /// verbatim at `p`; otherwise a fresh rev is computed and a stale `_rev`
    /// is a [`Conflict`](SummaError::Conflict) (unless `p` was never
    /// written). Returns the resulting rev at `p`.
    #[tracing::instrument(skip(self, tree), fields(path = %p, preserve_rev))]
    pub fn replace_tree_at(&self, p: &TreePath, tree: &Value, preserve_rev: bool) -> Result<Rev> {
        self.guard_writable(p)?;
        let Value::Object(map) = tree else {
            return Err(SummaError::InvalidValue("tree must be a JSON object".into()));
        };

        let given_rev = match map.get("_rev") {
            None => None,
            Some(Value::String(s)) => Some(Rev::parse(s)?),
            Some(_) => return Err(SummaError::BadRequest("_rev must be a string".into())),
        };

        let _guard = self.write_lock.lock();

        let current = self.get_rev(p)?;
        if !preserve_rev {
            if let Some(given) = &given_rev {
                if !current.is_null() && *given != current {
                    return Err(SummaError::Conflict {
                        current: current.to_string(),
                        given: given.to_string(),
                    });
                }
            }
        }

        let mut touched = Touched::new();
        touched.insert(p.clone(), PendingWrite::revive());

        // Children being replaced away get tombstones, exactly as a delete
        // of each would.
        for (name, meta) in self.list_children(p)? {
            if meta.deleted || map.contains_key(&name) {
                continue;
            }
            self.tombstone_subtree(&p.child(&name), &mut touched)?;
        }

        self.merge_tree(p, map, &mut touched)?;

        if preserve_rev {
            if let Some(adopted) = given_rev {
                touched
                    .get_mut(p)
                    .expect("target path is always touched")
                    .adopt_rev = Some(adopted);
            }
        }

        let revs = self.commit_locked("replace_tree", touched, p)?;
        Ok(revs[p].clone())
    }

    /// Tombstone `p` and every live descendant in one batch. Revs bump at
    /// `p`, the descendants and every ancestor.
    #[tracing::instrument(skip(self), fields(path = %p))]
    pub fn delete_at(&self, p: &TreePath) -> Result<Rev> {
        self.guard_writable(p)?;
        let _guard = self.write_lock.lock();

        if self.get_rev(p)?.is_null() {
            return Err(SummaError::NotFound);
        }

        let mut touched = Touched::new();
        self.tombstone_subtree(p, &mut touched)?;
        let revs = self.commit_locked("delete", touched, p)?;
        Ok(revs[p].clone())
    }

    // --- Batch construction ---

    /// Recursively record the writes a nested mapping implies.
    fn merge_tree(
        &self,
        base: &TreePath,
        map: &serde_json::Map<String, Value>,
        touched: &mut Touched,
    ) -> Result<()> {
        for (key, child) in map {
            match key.as_str() {
                path::SEG_VAL => match child {
                    Value::Null => set_value_op(touched, base, ValueOp::Clear),
                    v if is_scalar(v) => {
                        set_value_op(touched, base, ValueOp::Set(scalar_bytes(v)?));
                    }
                    _ => {
                        return Err(SummaError::InvalidValue(format!(
                            "_val at {base} must be a scalar"
                        )))
                    }
                },
                path::SEG_DELETED => {
                    if child.as_bool() == Some(true) {
                        self.tombstone_subtree(base, touched)?;
                    }
                }
                reserved if reserved.starts_with('_') => continue,
                name => {
                    let cp = base.child(name);
                    match child {
                        Value::Null => self.tombstone_subtree(&cp, touched)?,
                        Value::Object(inner) => {
                            touched.entry(cp.clone()).or_insert_with(PendingWrite::revive);
                            self.merge_tree(&cp, inner, touched)?;
                        }
                        Value::Array(_) => {
                            return Err(SummaError::InvalidValue(format!(
                                "arrays are not representable at {cp}"
                            )))
                        }
                        v => set_value_op(touched, &cp, ValueOp::Set(scalar_bytes(v)?)),
                    }
                }
            }
        }
        Ok(())
    }

    /// Tombstone `p` and every live descendant found on disk.
    fn tombstone_subtree(&self, p: &TreePath, touched: &mut Touched) -> Result<()> {
        touched.insert(p.clone(), PendingWrite::tombstone());

        let (start, end) = path::subtree_range(p);
        for (key, _) in self.kv.scan_range(Keyspace::Tree, &start, Some(&end))? {
            let (node, attr) = path::decode(&key)?;
            if attr != Attr::Rev || node == *p {
                continue;
            }
            // Already-tombstoned descendants keep their rev and stay put.
            let deleted_key = path::encode(&node, Attr::Deleted);
            if self.kv.get(Keyspace::Tree, &deleted_key)?.is_some() {
                continue;
            }
            touched.insert(node, PendingWrite::tombstone());
        }
        Ok(())
    }

    /// Assign the next sequence, compute revs bottom-up and commit one
    /// atomic batch. Must be called with the write lock held; `target` is
    /// the operation's path and names the batch in the change log.
    fn commit_locked(
        &self,
        operation: &'static str,
        mut touched: Touched,
        target: &TreePath,
    ) -> Result<BTreeMap<TreePath, Rev>> {
        use std::sync::atomic::Ordering;

        let seq = self.update_seq.load(Ordering::Acquire) + 1;

        // Every strict ancestor of a touched path is touched too.
        let explicit: Vec<TreePath> = touched.keys().cloned().collect();
        for written in explicit {
            let mut cursor = written;
            while let Some(parent) = cursor.parent() {
                touched.entry(parent.clone()).or_insert_with(PendingWrite::revive);
                cursor = parent;
            }
        }

        // Deepest first, so each parent sees its children's new revs.
        let mut order: Vec<TreePath> = touched.keys().cloned().collect();
        order.sort_by(|a, b| b.depth().cmp(&a.depth()).then_with(|| a.cmp(b)));

        let mut batch = WriteBatch::new();
        let mut new_revs: BTreeMap<TreePath, Rev> = BTreeMap::new();
        let mut bumped_children: BTreeMap<TreePath, BTreeMap<String, Rev>> = BTreeMap::new();

        for node in &order {
            let pending = &touched[node];

            let value_bytes: Cow<'_, [u8]> = match &pending.value {
                ValueOp::Set(bytes) => Cow::Borrowed(bytes.as_slice()),
                ValueOp::Clear => Cow::Borrowed(&[]),
                ValueOp::Keep => Cow::Owned(
                    self.kv
                        .get(Keyspace::Tree, &path::encode(node, Attr::Value))?
                        .unwrap_or_default(),
                ),
            };

            let children = bumped_children.remove(node).unwrap_or_default();
            let digest = child_digest(&children);
            let new_rev = match &pending.adopt_rev {
                Some(adopted) => adopted.clone(),
                None => self.get_rev(node)?.bump(&value_bytes, &digest),
            };

            match &pending.value {
                ValueOp::Set(bytes) => {
                    batch.put(Keyspace::Tree, path::encode(node, Attr::Value), bytes.clone());
                }
                ValueOp::Clear => {
                    batch.delete(Keyspace::Tree, path::encode(node, Attr::Value));
                }
                ValueOp::Keep => {}
            }
            match pending.deleted {
                Some(true) => {
                    batch.put(Keyspace::Tree, path::encode(node, Attr::Deleted), vec![b'1']);
                }
                Some(false) => {
                    batch.delete(Keyspace::Tree, path::encode(node, Attr::Deleted));
                }
                None => {}
            }
            batch.put(
                Keyspace::Tree,
                path::encode(node, Attr::Rev),
                new_rev.to_string().into_bytes(),
            );
            batch.put(
                Keyspace::Tree,
                path::encode(node, Attr::Seq),
                seq.to_be_bytes().to_vec(),
            );

            if let Some((parent, segment)) = node.split_last() {
                bumped_children
                    .entry(parent)
                    .or_default()
                    .insert(segment.to_string(), new_rev.clone());
            }
            new_revs.insert(node.clone(), new_rev);
        }

        let record = ChangeRecord {
            path: target.to_string(),
            rev: new_revs[target].to_string(),
            deleted: touched[target].deleted == Some(true),
        };
        batch.put(
            Keyspace::Changes,
            super::changes::change_key(seq),
            serde_json::to_vec(&record)
                .map_err(|e| SummaError::BadRequest(format!("unencodable change: {e}")))?,
        );

        let entries = batch.len();
        self.kv.apply(batch)?;
        self.update_seq.store(seq, Ordering::Release);

        crate::metrics::record_operation(operation, "ok");
        crate::metrics::record_batch_entries(operation, entries);
        crate::metrics::set_update_seq(seq);
        debug!(seq, touched = new_revs.len(), entries, "committed batch");

        Ok(new_revs)
    }
}

fn scalar_bytes(v: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(v).map_err(|e| SummaError::InvalidValue(format!("unencodable scalar: {e}")))
}

fn set_value_op(touched: &mut Touched, p: &TreePath, op: ValueOp) {
    match touched.get_mut(p) {
        Some(pending) => {
            pending.value = op;
            pending.deleted = Some(false);
        }
        None => {
            touched.insert(
                p.clone(),
                PendingWrite {
                    value: op,
                    deleted: Some(false),
                    adopt_rev: None,
                },
            );
        }
    }
}
