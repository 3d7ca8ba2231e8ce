//! # SummaDB
//!
//! A hierarchical document database. Every path in the tree is
//! simultaneously a document, a sub-document and a scalar field, and every
//! subtree is a database speaking a CouchDB/PouchDB-compatible replication
//! subset.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       HTTP Surface                          │
//! │  • GET/PUT/PATCH/DELETE on any tree path                    │
//! │  • _changes, _all_docs, _bulk_get, _bulk_docs, _revs_diff   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Tree Store (SummaDb)                    │
//! │  • One atomic KV batch and one global seq per write         │
//! │  • Revs bump at the target, its descendants and ancestors   │
//! │  • Change log + per-path last-seq index                     │
//! │  • _local/ docs outside the feed                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Ordered KV (redb / memory)               │
//! │  • Encoded path + attribute keys, subtree = range scan      │
//! │  • Atomic write batches, snapshot reads                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use serde_json::json;
//! use summadb::{SummaConfig, SummaDb, TreePath};
//!
//! let db = SummaDb::open(SummaConfig::default()).unwrap();
//!
//! let banana = TreePath::parse("/fruits/banana").unwrap();
//! db.save_tree_at(&banana, &json!({"colour": "yellow", "_val": "a fruit."}))
//!     .unwrap();
//!
//! assert_eq!(db.get_value_at(&banana).unwrap(), b"\"a fruit.\"");
//! let colour = TreePath::parse("/fruits/banana/colour").unwrap();
//! assert_eq!(db.get_value_at(&colour).unwrap(), b"\"yellow\"");
//! ```
//!
//! ## Modules
//!
//! - [`store`]: the [`SummaDb`] handle and the tree/revision/change core
//! - [`replication`]: `_bulk_docs` and friends over the store
//! - [`http`]: the axum router and handlers
//! - [`kv`]: ordered key-value backends (redb, in-memory)
//! - [`path`], [`revision`]: tree paths, key codec, rev discipline

pub mod config;
pub mod error;
pub mod http;
pub mod kv;
pub mod metrics;
pub mod path;
pub mod replication;
pub mod revision;
pub mod store;

pub use config::SummaConfig;
pub use error::{Result, SummaError};
pub use http::build_router;
pub use path::TreePath;
pub use revision::Rev;
pub use store::{Change, DbInfo, SummaDb};
