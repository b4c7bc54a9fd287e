use axum::extract::{Path, State};
use axum::Json;
use relay_core::error::CoreError;
use relay_core::session::SessionSnapshot;
use serde::Serialize;

use crate::error::AppResult;
use crate::handlers::parse_session_id;
use crate::response::Success;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

// ---------------------------------------------------------------------------
// GET /status/{session_id}
// ---------------------------------------------------------------------------

/// Current snapshot of a session, for clients that poll.
pub async fn get_status(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> AppResult<Json<Success<SessionSnapshot>>> {
    let id = parse_session_id(&raw)?;
    let session = state.sessions.require(id).await?;
    Ok(Json(Success::new(session.snapshot())))
}

// ---------------------------------------------------------------------------
// DELETE /sessions/{session_id}
// ---------------------------------------------------------------------------

/// Close a session: drop its engine connection and forget it.
pub async fn close_session(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> AppResult<Json<Success<MessageResponse>>> {
    let id = parse_session_id(&raw)?;
    let removed = state.sessions.remove(id).await;
    let bridged = state.bridges.close(id).await;

    if removed.is_none() && !bridged {
        return Err(CoreError::NotFound {
            entity: "Session",
            id: raw,
        }
        .into());
    }

    tracing::info!(session_id = %id, bridged, "Session closed");
    Ok(Json(Success::new(MessageResponse {
        message: "Session closed",
    })))
}
