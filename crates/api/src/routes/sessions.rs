//! Route definitions for relay sessions.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::{execute, images, sessions};
use crate::state::AppState;

/// ```text
/// POST   /upload-image               -> upload_image (multipart)
/// POST   /execute                    -> execute_workflow
/// GET    /status/{session_id}        -> get_status
/// DELETE /sessions/{session_id}      -> close_session
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload-image", post(images::upload_image))
        .route("/execute", post(execute::execute_workflow))
        .route("/status/{session_id}", get(sessions::get_status))
        .route("/sessions/{session_id}", delete(sessions::close_session))
}
