//! CouchDB-compatible HTTP surface.
//!
//! Every subtree path doubles as a database: `GET /any/path/` serves its
//! info, `_changes`/`_all_docs`/`_bulk_docs`/`_bulk_get`/`_revs_diff`
//! operate on it, and plain verbs address the tree itself.

pub mod handlers;
pub mod responses;
pub mod router;

pub use handlers::AppState;
pub use router::build_router;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    use crate::config::SummaConfig;
    use crate::store::SummaDb;

    use super::build_router;

    fn app() -> axum::Router {
        let db = Arc::new(SummaDb::open(SummaConfig::default()).unwrap());
        build_router(db)
    }

    #[tokio::test]
    async fn root_info_answers() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn missing_path_is_404() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/no/such/path")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let app = app();

        let put = Request::builder()
            .method("PUT")
            .uri("/fruits/banana")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"colour": "yellow"}"#))
            .unwrap();
        let response = app.clone().oneshot(put).await.unwrap();
        assert_eq!(response.status(), 201);

        let get = Request::builder()
            .uri("/fruits/banana")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(get).await.unwrap();
        assert_eq!(response.status(), 200);
    }
}
