//! Route definitions for stored job documents.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::workflows;
use crate::state::AppState;

/// ```text
/// GET    /workflows              -> list_workflows
/// GET    /workflows/{id}         -> get_workflow
/// DELETE /workflows/{id}         -> delete_workflow
/// POST   /upload-workflow        -> upload_workflow (multipart)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workflows", get(workflows::list_workflows))
        .route(
            "/workflows/{id}",
            get(workflows::get_workflow).delete(workflows::delete_workflow),
        )
        .route("/upload-workflow", post(workflows::upload_workflow))
}
