//! CouchDB-style response bodies and error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;

use crate::error::SummaError;
use crate::revision::Rev;

/// Wire shape of every error answer: `{"error": ..., "reason": ...}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub reason: String,
}

impl ErrorBody {
    pub fn of(err: &SummaError) -> Self {
        Self {
            error: err.name().to_string(),
            reason: err.to_string(),
        }
    }
}

pub fn status_of(err: &SummaError) -> StatusCode {
    match err {
        SummaError::NotFound => StatusCode::NOT_FOUND,
        SummaError::Conflict { .. } => StatusCode::CONFLICT,
        SummaError::BadRequest(_) | SummaError::InvalidValue(_) => StatusCode::BAD_REQUEST,
        SummaError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for SummaError {
    fn into_response(self) -> Response {
        if matches!(self, SummaError::Storage(_)) {
            tracing::error!(error = %self, "internal error");
        }
        (status_of(&self), Json(ErrorBody::of(&self))).into_response()
    }
}

/// `{"ok": true, "id": ..., "rev": ...}` for successful writes.
pub fn write_ok(status: StatusCode, id: &str, rev: &Rev) -> Response {
    (
        status,
        Json(json!({ "ok": true, "id": id, "rev": rev.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_error_kinds() {
        assert_eq!(status_of(&SummaError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(&SummaError::Conflict {
                current: "1-a".into(),
                given: "1-b".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(&SummaError::BadRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
    }
}
