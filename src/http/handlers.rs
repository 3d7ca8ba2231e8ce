//! Request handlers for the CouchDB-compatible surface.
//!
//! One wildcard route carries every path; the final segment dispatches the
//! special endpoints (`_changes`, `_all_docs`, `_bulk_docs`, `_bulk_get`,
//! `_revs_diff`). Everything else is the tree itself: GET materializes,
//! PUT replaces, PATCH merges, DELETE tombstones.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SummaError};
use crate::path::TreePath;
use crate::replication::{self, BulkGetItem};
use crate::store::SummaDb;

use super::responses::write_ok;

pub type AppState = Arc<SummaDb>;
type Params = HashMap<String, String>;

fn flag(params: &Params, name: &str) -> bool {
    match params.get(name).map(String::as_str) {
        Some("false") | Some("0") => false,
        Some(_) => true,
        None => false,
    }
}

// --- GET ---

pub async fn get_root(
    State(db): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Response> {
    get_at(&db, "", &params)
}

pub async fn get_path(
    State(db): State<AppState>,
    UrlPath(raw): UrlPath<String>,
    Query(params): Query<Params>,
) -> Result<Response> {
    get_at(&db, &raw, &params)
}

fn get_at(db: &SummaDb, raw: &str, params: &Params) -> Result<Response> {
    let path = TreePath::parse(raw)?;

    match path.last() {
        Some("_changes") => {
            let base = path.parent().expect("suffix implies non-root");
            let since = match params.get("since").map(String::as_str) {
                Some("now") => db.global_update_seq(),
                Some(n) => n.parse().unwrap_or(0),
                None => 0,
            };
            let feed = replication::changes(db, &base, since)?;
            return Ok(Json(feed).into_response());
        }
        Some("_all_docs") => {
            let base = path.parent().expect("suffix implies non-root");
            let include_docs = flag(params, "include_docs");
            let keys: Option<Vec<String>> = match params.get("keys") {
                Some(raw) => Some(serde_json::from_str(raw).map_err(|e| {
                    SummaError::BadRequest(format!("keys must be a JSON array: {e}"))
                })?),
                None => None,
            };
            let response = replication::all_docs(db, &base, include_docs, keys.as_deref())?;
            return Ok(Json(response).into_response());
        }
        _ => {}
    }

    if path.is_local() {
        let mut doc = db.get_local_doc_at(&path)?;
        if let Value::Object(map) = &mut doc {
            map.insert("_id".to_string(), Value::String(local_doc_id(&path)));
        }
        return Ok(Json(doc).into_response());
    }

    // `GET /db/` answers database info; every subtree is a database.
    if raw.ends_with('/') || raw.is_empty() || flag(params, "info") {
        return Ok(Json(db.info(&path)?).into_response());
    }

    let (_, attr_suffix) = path.split_attr_suffix();
    if attr_suffix.is_some() || flag(params, "raw") {
        let bytes = db.get_value_at(&path)?;
        return Ok(raw_json(bytes));
    }

    Ok(Json(db.get_tree_at(&path)?).into_response())
}

/// The `_local/...` part of a path, as the id replicators used to store it.
fn local_doc_id(path: &TreePath) -> String {
    let segments = path.segments();
    let start = segments
        .iter()
        .position(|s| s == crate::path::SEG_LOCAL)
        .unwrap_or(0);
    segments[start..].join("/")
}

fn raw_json(bytes: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        bytes,
    )
        .into_response()
}

// --- PUT ---

pub async fn put_root(
    State(db): State<AppState>,
    Query(params): Query<Params>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    put_at(&db, "", &params, &headers, &body)
}

pub async fn put_path(
    State(db): State<AppState>,
    UrlPath(raw): UrlPath<String>,
    Query(params): Query<Params>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    put_at(&db, &raw, &params, &headers, &body)
}

/// An `If-Match: "1-abc"` header carries a rev the same way `?rev=` does.
fn if_match_rev(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::IF_MATCH)?.to_str().ok()?;
    Some(value.trim().trim_matches('"').to_string())
}

fn put_at(
    db: &SummaDb,
    raw: &str,
    params: &Params,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response> {
    let path = TreePath::parse(raw)?;
    let parsed: Value = serde_json::from_slice(body)
        .map_err(|e| SummaError::BadRequest(format!("body is not JSON: {e}")))?;

    let rev_hint = params.get("rev").cloned().or_else(|| if_match_rev(headers));

    if path.is_local() {
        let current = db.get_local_doc_rev(&path)?;
        let given = rev_hint
            .or_else(|| parsed.get("_rev").and_then(Value::as_str).map(str::to_string));
        if !current.is_null() && given.as_deref() != Some(&current.to_string()) {
            return Err(SummaError::Conflict {
                current: current.to_string(),
                given: given.unwrap_or_default(),
            });
        }
        let rev = db.save_local_doc_at(&path, &parsed)?;
        return Ok(write_ok(StatusCode::CREATED, &local_doc_id(&path), &rev));
    }

    let rev = match parsed {
        Value::Object(mut map) => {
            if let Some(rev) = rev_hint {
                map.entry("_rev".to_string())
                    .or_insert_with(|| Value::String(rev));
            }
            db.replace_tree_at(&path, &Value::Object(map), false)?
        }
        Value::Array(_) => {
            return Err(SummaError::InvalidValue(
                "arrays are not representable".into(),
            ))
        }
        _ => db.save_value_at(&path, body.to_vec())?,
    };

    Ok(write_ok(StatusCode::CREATED, &path.to_string(), &rev))
}

// --- PATCH ---

pub async fn patch_root(State(db): State<AppState>, body: Bytes) -> Result<Response> {
    patch_at(&db, "", &body)
}

pub async fn patch_path(
    State(db): State<AppState>,
    UrlPath(raw): UrlPath<String>,
    body: Bytes,
) -> Result<Response> {
    patch_at(&db, &raw, &body)
}

fn patch_at(db: &SummaDb, raw: &str, body: &[u8]) -> Result<Response> {
    let path = TreePath::parse(raw)?;
    let tree: Value = serde_json::from_slice(body)
        .map_err(|e| SummaError::BadRequest(format!("body is not JSON: {e}")))?;
    let rev = db.save_tree_at(&path, &tree)?;
    Ok(write_ok(StatusCode::OK, &path.to_string(), &rev))
}

// --- DELETE ---

pub async fn delete_root(
    State(db): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Response> {
    delete_at(&db, "", &params)
}

pub async fn delete_path(
    State(db): State<AppState>,
    UrlPath(raw): UrlPath<String>,
    Query(params): Query<Params>,
) -> Result<Response> {
    delete_at(&db, &raw, &params)
}

fn delete_at(db: &SummaDb, raw: &str, params: &Params) -> Result<Response> {
    let path = TreePath::parse(raw)?;
    if let Some(given) = params.get("rev") {
        let current = db.get_rev(&path)?;
        if !current.is_null() && *given != current.to_string() {
            return Err(SummaError::Conflict {
                current: current.to_string(),
                given: given.clone(),
            });
        }
    }
    let rev = db.delete_at(&path)?;
    Ok(write_ok(StatusCode::OK, &path.to_string(), &rev))
}

// --- POST (bulk endpoints) ---

#[derive(Debug, Deserialize)]
struct BulkDocsBody {
    docs: Vec<Value>,
    #[serde(default = "default_new_edits")]
    new_edits: bool,
}

fn default_new_edits() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct BulkGetBody {
    docs: Vec<BulkGetItem>,
}

pub async fn post_path(
    State(db): State<AppState>,
    UrlPath(raw): UrlPath<String>,
    Query(params): Query<Params>,
    body: Bytes,
) -> Result<Response> {
    let path = TreePath::parse(&raw)?;
    let (base, endpoint) = match path.split_last() {
        Some((base, endpoint)) => (base, endpoint.to_string()),
        None => return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    };

    match endpoint.as_str() {
        "_bulk_docs" => {
            let request: BulkDocsBody = serde_json::from_slice(&body).map_err(|e| {
                SummaError::BadRequest(format!(
                    "you're supposed to send an array of docs to input on the database: {e}"
                ))
            })?;
            let results = replication::bulk_docs(&db, &base, &request.docs, request.new_edits)?;
            Ok((StatusCode::CREATED, Json(results)).into_response())
        }
        "_bulk_get" => {
            let request: BulkGetBody = serde_json::from_slice(&body).map_err(|e| {
                SummaError::BadRequest(format!(
                    "you were supposed to request some docs specified by their ids: {e}"
                ))
            })?;
            let revs = flag(&params, "revs");
            let response = replication::bulk_get(&db, &base, &request.docs, revs)?;
            Ok(Json(response).into_response())
        }
        "_revs_diff" => {
            let request: Value = serde_json::from_slice(&body)
                .map_err(|e| SummaError::BadRequest(format!("body is not JSON: {e}")))?;
            let Value::Object(map) = request else {
                return Err(SummaError::BadRequest(
                    "expected {id: [revs, ...]} pairs".into(),
                ));
            };
            let diff = replication::revs_diff(&db, &base, &map)?;
            Ok(Json(diff).into_response())
        }
        _ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    }
}
