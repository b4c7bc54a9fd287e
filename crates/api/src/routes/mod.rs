pub mod health;
pub mod images;
pub mod sessions;
pub mod workflows;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /health                                     service health
///
/// /workflows                                  list stored job documents
/// /workflows/{id}                             get, delete
/// /upload-workflow                            store a job document (multipart)
///
/// /upload-image                               forward an input image (multipart)
/// /execute                                    run a stored job document
/// /status/{session_id}                        session snapshot
/// /sessions/{session_id}                      close a session (DELETE)
///
/// /images/{filename}                          engine image proxy
/// ```
///
/// The browser push channel lives at `/ws`, outside this tree.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(workflows::router())
        .merge(sessions::router())
        .merge(images::router())
}
