// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! CouchDB/PouchDB replication operations.
//!
//! `_all_docs`, `_bulk_get`, `_revs_diff`, `_bulk_docs` and `_changes`
//! expressed over the tree store. Every subtree acts as a database: the
//! `base` path below is the database root and document ids are paths
//! relative to it.
//!
//! Per-document failures (`not_found`, `conflict`) never fail a whole
//! batch; they come back inside the per-document results, and
//! `_bulk_docs` always answers with one result per input doc.

use std::collections::BTreeMap;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::{Result, SummaError};
use crate::path::TreePath;
use crate::revision::Rev;
use crate::store::{Change, SummaDb};

/// Attempts at generating a fresh random doc id before giving up.
const ID_GENERATION_ATTEMPTS: usize = 10;

// --- Response shapes (CouchDB wire format) ---

#[derive(Debug, Clone, Serialize)]
pub struct AllDocsRow {
    pub id: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllDocsResponse {
    pub total_rows: usize,
    pub offset: usize,
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkGetItem {
    pub id: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub rev: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkGetDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkGetResult {
    pub id: String,
    pub docs: Vec<BulkGetDoc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkGetResponse {
    pub results: Vec<BulkGetResult>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RevsDiffResult {
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkDocsResult {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BulkDocsResult {
    fn ok(id: String, rev: &Rev) -> Self {
        Self {
            id,
            ok: Some(true),
            rev: Some(rev.to_string()),
            error: None,
            reason: None,
        }
    }

    fn error(id: String, err: &SummaError) -> Self {
        Self {
            id,
            ok: None,
            rev: None,
            error: Some(err.name().to_string()),
            reason: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeRow {
    pub seq: u64,
    pub id: String,
    pub changes: Vec<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangesResponse {
    pub last_seq: u64,
    pub results: Vec<ChangeRow>,
}

// --- Operations ---

/// Resolve a document id against the database root. Ids may contain `/`
/// (nested documents, `_local/` checkpoints).
fn doc_path(base: &TreePath, id: &str) -> Result<TreePath> {
    if id.is_empty() {
        return Err(SummaError::BadRequest("empty document id".into()));
    }
    Ok(base.join(&TreePath::parse(id)?))
}

/// Strip the keys PouchDB refuses at the top level of a replicated doc and
/// stamp identity fields.
fn present_doc(mut tree: Value, id: &str, rev: &Rev) -> Value {
    if let Value::Object(map) = &mut tree {
        map.remove("_val");
        map.insert("_id".to_string(), Value::String(id.to_string()));
        map.insert("_rev".to_string(), Value::String(rev.to_string()));
    }
    tree
}

/// Enumerate the immediate children of `base`, skipping reserved names.
pub fn all_docs(
    db: &SummaDb,
    base: &TreePath,
    include_docs: bool,
    keys: Option<&[String]>,
) -> Result<AllDocsResponse> {
    let children = db.list_children(base)?;

    let build_row = |id: &str| -> Result<Option<AllDocsRow>> {
        let Some(meta) = children.get(id) else {
            return Ok(None);
        };
        if meta.deleted {
            return Ok(None);
        }
        let doc = if include_docs {
            let tree = db.get_tree_at(&base.child(id))?;
            Some(present_doc(tree, id, &meta.rev))
        } else {
            None
        };
        Ok(Some(AllDocsRow {
            id: id.to_string(),
            key: id.to_string(),
            value: Some(json!({ "rev": meta.rev.to_string() })),
            doc,
            error: None,
        }))
    };

    let mut rows = Vec::new();
    match keys {
        Some(keys) => {
            for id in keys {
                let row = if id.starts_with('_') {
                    None
                } else {
                    build_row(id)?
                };
                rows.push(row.unwrap_or_else(|| AllDocsRow {
                    id: id.clone(),
                    key: id.clone(),
                    value: None,
                    doc: None,
                    error: Some("not_found".to_string()),
                }));
            }
        }
        None => {
            for id in children.keys() {
                if id.starts_with('_') {
                    continue;
                }
                if let Some(row) = build_row(id)? {
                    rows.push(row);
                }
            }
        }
    }

    let total_rows = rows.iter().filter(|r| r.error.is_none()).count();
    Ok(AllDocsResponse {
        total_rows,
        offset: 0,
        rows,
    })
}

/// Batch fetch. With `revs`, only the current rev is surfaced; no revision
/// history is fabricated.
pub fn bulk_get(
    db: &SummaDb,
    base: &TreePath,
    requests: &[BulkGetItem],
    _revs: bool,
) -> Result<BulkGetResponse> {
    let mut results = Vec::with_capacity(requests.len());
    for req in requests {
        let doc = fetch_one(db, base, &req.id);
        results.push(BulkGetResult {
            id: req.id.clone(),
            docs: vec![doc],
        });
    }
    Ok(BulkGetResponse { results })
}

fn fetch_one(db: &SummaDb, base: &TreePath, id: &str) -> BulkGetDoc {
    let attempt = || -> Result<Value> {
        let path = doc_path(base, id)?;
        if path.is_local() {
            return db.get_local_doc_at(&path);
        }
        let rev = db.get_rev(&path)?;
        let tree = db.get_tree_at(&path)?;
        Ok(present_doc(tree, id, &rev))
    };
    match attempt() {
        Ok(doc) => BulkGetDoc {
            ok: Some(doc),
            error: None,
        },
        Err(err) => BulkGetDoc {
            ok: None,
            error: Some(json!({
                "id": id,
                "rev": "undefined",
                "error": err.name(),
                "reason": err.to_string(),
            })),
        },
    }
}

/// For each id, the listed revs we hold neither as current nor as
/// acknowledged. Unknown ids miss everything.
pub fn revs_diff(
    db: &SummaDb,
    base: &TreePath,
    requested: &Map<String, Value>,
) -> Result<BTreeMap<String, RevsDiffResult>> {
    let mut out = BTreeMap::new();
    for (id, revs) in requested {
        let Value::Array(revs) = revs else {
            return Err(SummaError::BadRequest(format!(
                "revs for {id} must be an array"
            )));
        };
        let revs: Vec<&str> = revs
            .iter()
            .map(|r| {
                r.as_str()
                    .ok_or_else(|| SummaError::BadRequest(format!("non-string rev for {id}")))
            })
            .collect::<Result<_>>()?;

        let path = doc_path(base, id)?;
        let current = db.get_rev(&path)?;
        let missing = if current.is_null() {
            revs.iter().map(ToString::to_string).collect()
        } else {
            let current = current.to_string();
            let seen = db.seen_revs(&path)?;
            revs.iter()
                .filter(|r| **r != current && !seen.iter().any(|s| s == *r))
                .map(ToString::to_string)
                .collect()
        };
        out.insert(id.clone(), RevsDiffResult { missing });
    }
    Ok(out)
}

/// Batch write. Every input doc yields exactly one result; conflicts and
/// other per-doc failures never abort the rest of the batch.
#[tracing::instrument(skip(db, docs), fields(base = %base, new_edits, docs = docs.len()))]
pub fn bulk_docs(
    db: &SummaDb,
    base: &TreePath,
    docs: &[Value],
    new_edits: bool,
) -> Result<Vec<BulkDocsResult>> {
    let mut results = Vec::with_capacity(docs.len());
    for doc in docs {
        let Value::Object(map) = doc else {
            results.push(BulkDocsResult::error(
                String::new(),
                &SummaError::BadRequest("doc must be an object".into()),
            ));
            continue;
        };
        let result = if new_edits {
            write_edit(db, base, map)
        } else {
            write_replicated(db, base, map)
        };
        results.push(result);
    }
    Ok(results)
}

fn doc_id(map: &Map<String, Value>) -> Option<String> {
    map.get("_id").and_then(Value::as_str).map(str::to_string)
}

fn doc_rev(map: &Map<String, Value>) -> Option<String> {
    map.get("_rev").and_then(Value::as_str).map(str::to_string)
}

/// `new_edits=true`: a normal interactive write.
fn write_edit(db: &SummaDb, base: &TreePath, map: &Map<String, Value>) -> BulkDocsResult {
    let id = match doc_id(map) {
        Some(id) => id,
        None => match generate_doc_id(db, base) {
            Ok(id) => id,
            Err(err) => return BulkDocsResult::error(String::new(), &err),
        },
    };

    let attempt = || -> Result<Rev> {
        let path = doc_path(base, &id)?;

        if path.is_local() {
            let current = db.get_local_doc_rev(&path)?;
            let given = doc_rev(map).unwrap_or_default();
            if !current.is_null() && current.to_string() != given {
                return Err(SummaError::Conflict {
                    current: current.to_string(),
                    given,
                });
            }
            return db.save_local_doc_at(&path, &Value::Object(map.clone()));
        }

        db.replace_tree_at(&path, &Value::Object(map.clone()), false)
    };

    match attempt() {
        Ok(rev) => BulkDocsResult::ok(id, &rev),
        Err(err) => {
            debug!(id, error = %err, "bulk doc rejected");
            BulkDocsResult::error(id, &err)
        }
    }
}

/// `new_edits=false`: a replication push carrying its own revs.
fn write_replicated(db: &SummaDb, base: &TreePath, map: &Map<String, Value>) -> BulkDocsResult {
    let (id, given) = match (doc_id(map), doc_rev(map)) {
        (Some(id), Some(rev)) => (id, rev),
        (id, _) => {
            return BulkDocsResult::error(
                id.unwrap_or_default(),
                &SummaError::BadRequest("replicated docs need both _id and _rev".into()),
            )
        }
    };

    let attempt = || -> Result<Rev> {
        let inbound = Rev::parse(&given)?;
        let path = doc_path(base, &id)?;
        let current = db.get_rev(&path)?;

        if inbound < current {
            // The local winner stays; remember the rev so _revs_diff stops
            // asking for it.
            db.acknowledge_rev_for(&path, &inbound)?;
            return Ok(inbound);
        }
        db.replace_tree_at(&path, &Value::Object(map.clone()), true)
    };

    match attempt() {
        Ok(rev) => BulkDocsResult::ok(id, &rev),
        Err(err) => {
            warn!(id, error = %err, "replicated doc rejected");
            BulkDocsResult::error(id, &err)
        }
    }
}

/// Random alphanumeric doc id; collisions are detected and retried.
fn generate_doc_id(db: &SummaDb, base: &TreePath) -> Result<String> {
    let length = db.config().id_length;
    for _ in 0..ID_GENERATION_ATTEMPTS {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect();
        if db.get_rev(&base.child(&id))?.is_null() {
            return Ok(id);
        }
    }
    Err(SummaError::BadRequest(
        "could not generate a fresh document id".into(),
    ))
}

/// The change feed for the subtree database at `base`.
pub fn changes(db: &SummaDb, base: &TreePath, since: u64) -> Result<ChangesResponse> {
    let raw = db.list_changes_at(base, since)?;
    let mut results = Vec::with_capacity(raw.len());
    let mut last_seq = 0;

    for Change {
        seq,
        path,
        rev,
        deleted,
    } in raw
    {
        last_seq = seq;
        let node = TreePath::parse(&path)?;
        let id = node.relative_to(base).join("/");
        if id.is_empty() {
            // The database root itself; not addressable as a doc id.
            continue;
        }
        results.push(ChangeRow {
            seq,
            id,
            changes: vec![json!({ "rev": rev })],
            deleted,
        });
    }

    Ok(ChangesResponse { last_seq, results })
}
