//! Applies ComfyUI messages to the session store.
//!
//! Translates each [`ComfyUIMessage`] into a session transition and, where
//! the browser cares, a [`ClientEvent`] for the session's client id. Events
//! for a different prompt than the session's current one are dropped.

use relay_comfyui::messages::ComfyUIMessage;
use relay_core::events::ClientEvent;
use relay_core::session::Session;
use relay_core::types::SessionId;

use crate::engine::reconcile::reconcile;
use crate::engine::RelayContext;

/// Handle one message from the session's engine connection.
pub async fn apply(ctx: &RelayContext, session_id: SessionId, message: ComfyUIMessage) {
    let prompt_id = message.prompt_id().map(str::to_string);
    let prompt_id = prompt_id.as_deref();

    match message {
        ComfyUIMessage::Status(data) => {
            let queue_remaining = data.queue_remaining();
            tracing::debug!(session_id = %session_id, ?queue_remaining, "ComfyUI queue status");
            if queue_remaining == Some(0) {
                reconcile(ctx, session_id).await;
            }
        }

        ComfyUIMessage::ExecutionStart(_) => {
            tracing::info!(session_id = %session_id, ?prompt_id, "Execution started");
        }

        ComfyUIMessage::ExecutionCached(data) => {
            tracing::debug!(
                session_id = %session_id,
                cached = data.nodes.len(),
                "Execution used cache",
            );
        }

        ComfyUIMessage::Progress(data) => {
            let fraction = data.fraction();
            tracing::debug!(
                session_id = %session_id,
                node = ?data.node,
                value = data.value,
                max = data.max,
                "Node progress",
            );
            update_and_notify(ctx, session_id, prompt_id, |s| {
                s.record_progress(data.node.as_deref(), fraction);
                ClientEvent::progress(s)
            })
            .await;
        }

        ComfyUIMessage::Executing(data) => match data.node {
            Some(node) => {
                tracing::debug!(session_id = %session_id, node = %node, "Executing node");
                update_and_notify(ctx, session_id, prompt_id, |s| {
                    s.record_executing(&node);
                    Some(ClientEvent::executing(s, &node))
                })
                .await;
            }
            None => {
                tracing::info!(session_id = %session_id, ?prompt_id, "Execution completed");
                update_and_notify(ctx, session_id, prompt_id, |s| {
                    s.complete();
                    Some(ClientEvent::finished(s))
                })
                .await;
            }
        },

        ComfyUIMessage::Executed(data) => {
            tracing::debug!(session_id = %session_id, node = %data.node, "Node executed");
            update_and_notify(ctx, session_id, prompt_id, |s| {
                s.record_executed(&data.node);
                None
            })
            .await;
        }

        ComfyUIMessage::ExecutionSuccess(_) => {
            tracing::info!(session_id = %session_id, ?prompt_id, "Execution succeeded");
        }

        ComfyUIMessage::ExecutionError(data) => {
            let message = data.message().to_string();
            tracing::error!(
                session_id = %session_id,
                node = ?data.node_id,
                exception_type = ?data.exception_type,
                error = %message,
                "Execution error",
            );
            update_and_notify(ctx, session_id, prompt_id, |s| {
                s.fail(message.clone());
                Some(ClientEvent::error(message, data.node_id.clone()))
            })
            .await;
        }

        ComfyUIMessage::ExecutionInterrupted(data) => {
            tracing::warn!(session_id = %session_id, node = ?data.node_id, "Execution interrupted");
            update_and_notify(ctx, session_id, prompt_id, |s| {
                s.fail(INTERRUPTED_MESSAGE);
                Some(ClientEvent::error(INTERRUPTED_MESSAGE, data.node_id.clone()))
            })
            .await;
        }
    }
}

/// Error shown when ComfyUI reports an interruption.
pub const INTERRUPTED_MESSAGE: &str = "Execution interrupted";

/// Run a transition on the session if the message belongs to its current
/// job, then push the resulting event, if any.
async fn update_and_notify<F>(
    ctx: &RelayContext,
    session_id: SessionId,
    prompt_id: Option<&str>,
    transition: F,
) where
    F: FnOnce(&mut Session) -> Option<ClientEvent>,
{
    let outcome = ctx
        .sessions
        .update(session_id, |s| {
            if !s.matches_job(prompt_id) {
                return Err(s.engine_job_id.clone());
            }
            Ok(transition(s).map(|event| (s.client_id.clone(), event)))
        })
        .await;

    match outcome {
        None => {
            tracing::debug!(session_id = %session_id, "Session gone, dropping engine message");
        }
        Some(Err(current)) => {
            tracing::debug!(
                session_id = %session_id,
                ?prompt_id,
                ?current,
                "Ignoring message for a previous prompt",
            );
        }
        Some(Ok(Some((client_id, event)))) => {
            ctx.ws_manager.send(&client_id, &event).await;
        }
        Some(Ok(None)) => {}
    }
}
