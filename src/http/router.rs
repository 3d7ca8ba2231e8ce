//! Route table.

use axum::routing::get;
use axum::Router;

use super::handlers::{self, AppState};

/// Build the axum router over a shared database handle.
///
/// A single wildcard route carries the whole tree; `GET /` is the root
/// database's info.
pub fn build_router(db: AppState) -> Router {
    Router::new()
        .route(
            "/",
            get(handlers::get_root)
                .put(handlers::put_root)
                .patch(handlers::patch_root)
                .delete(handlers::delete_root),
        )
        .route(
            "/{*path}",
            get(handlers::get_path)
                .put(handlers::put_path)
                .patch(handlers::patch_path)
                .delete(handlers::delete_path)
                .post(handlers::post_path),
        )
        .with_state(db)
}
