//! Crate-wide error type.

use thiserror::Error;

use crate::kv::KvError;

/// Errors surfaced by the storage core and replication operations.
///
/// `NotFound` and `Conflict` are reported per document inside bulk
/// operations and never fail a whole batch; `BadRequest` short-circuits a
/// request; `Storage` failures map to 500 at the HTTP boundary.
#[derive(Error, Debug)]
pub enum SummaError {
    #[error("not found")]
    NotFound,

    #[error("document update conflict: current rev is {current}, got {given}")]
    Conflict { current: String, given: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("storage error: {0}")]
    Storage(#[from] KvError),
}

impl SummaError {
    /// CouchDB-style short error name, used in response bodies and per-doc
    /// bulk results.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SummaError::NotFound => "not_found",
            SummaError::Conflict { .. } => "conflict",
            SummaError::BadRequest(_) => "bad_request",
            SummaError::InvalidValue(_) => "invalid_value",
            SummaError::Storage(_) => "internal_server_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, SummaError>;
