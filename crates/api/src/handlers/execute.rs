//! Handler that runs a stored job document on the engine.

use axum::extract::State;
use axum::Json;
use relay_core::error::CoreError;
use relay_core::events::ClientEvent;
use relay_core::mutation::{prepare_document, UserInputs};
use relay_core::session::Session;
use relay_core::types::SessionId;
use serde::{Deserialize, Serialize};

use crate::engine::BridgeState;
use crate::error::{AppError, AppResult};
use crate::response::Success;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub workflow_id: Option<String>,
    pub session_id: Option<String>,
    pub user_inputs: Option<UserInputs>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub session_id: SessionId,
    pub prompt_id: String,
    pub message: &'static str,
    /// Where the browser subscribes for this session's events.
    pub ws_endpoint: String,
    pub total_nodes: usize,
}

// ---------------------------------------------------------------------------
// POST /execute
// ---------------------------------------------------------------------------

/// Prepare a stored workflow for a session and queue it on the engine.
///
/// The engine connection is opened before submission so no early event is
/// missed; anything it delivers before the prompt id is recorded is applied
/// right after. A failed submission marks the session failed and answers 502.
pub async fn execute_workflow(
    State(state): State<AppState>,
    Json(input): Json<ExecuteRequest>,
) -> AppResult<Json<Success<ExecuteResponse>>> {
    let workflow_id = input
        .workflow_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("workflowId is required".into()))?;

    let (_, raw) = state.workflows.get(&workflow_id).await.map_err(|e| match e {
        CoreError::NotFound { .. } => {
            AppError::BadRequest(format!("Workflow {workflow_id} not found"))
        }
        other => AppError::Core(other),
    })?;

    let session = resolve_session(&state, input.session_id.as_deref()).await;
    let session_id = session.id;
    let client_id = session.client_id.clone();

    let prepared = prepare_document(
        &raw,
        input.user_inputs.as_ref(),
        session.uploaded_image.as_ref(),
    )?;
    let document = prepared.submitted.to_value()?;
    let total_nodes = prepared.submitted.len();

    state
        .sessions
        .update(session_id, |s| s.begin_execution(prepared))
        .await
        .ok_or_else(|| session_gone(session_id))?;

    let bridge = state.bridges.open(session_id, &client_id).await;
    if bridge != BridgeState::Connected {
        tracing::warn!(
            session_id = %session_id,
            ?bridge,
            "Submitting without a live engine connection",
        );
    }

    let submitted = match state.engine.submit(&document, &client_id).await {
        Ok(submitted) => submitted,
        Err(e) => {
            let message = format!("Failed to queue workflow: {e}");
            state
                .sessions
                .update(session_id, |s| s.fail(message.clone()))
                .await;
            state.bridges.close(session_id).await;
            state
                .ws_manager
                .send(&client_id, &ClientEvent::error(message, None))
                .await;
            return Err(e.into());
        }
    };

    let queued = state
        .sessions
        .update(session_id, |s| s.mark_queued(submitted.prompt_id.clone()))
        .await;
    if queued.is_none() {
        state.bridges.close(session_id).await;
        return Err(session_gone(session_id));
    }
    state.bridges.job_queued(session_id).await;

    tracing::info!(
        session_id = %session_id,
        workflow_id = %workflow_id,
        prompt_id = %submitted.prompt_id,
        total_nodes,
        "Workflow queued",
    );

    Ok(Json(Success::new(ExecuteResponse {
        session_id,
        prompt_id: submitted.prompt_id,
        message: "Workflow execution started",
        ws_endpoint: format!("/ws?clientId={client_id}"),
        total_nodes,
    })))
}

/// The named session if it exists, otherwise a new one.
async fn resolve_session(state: &AppState, raw: Option<&str>) -> Session {
    let existing = raw.and_then(|raw| raw.parse::<SessionId>().ok());
    if let Some(id) = existing {
        if let Some(session) = state.sessions.get(id).await {
            return session;
        }
        tracing::debug!(session_id = %id, "Unknown session, starting a new one");
    }
    state.sessions.create().await
}

fn session_gone(id: SessionId) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "Session",
        id: id.to_string(),
    })
}
