//! History reconciliation.
//!
//! When ComfyUI reports an empty queue the relay checks the prompt's
//! history for an output image. This recovers results whose terminal push
//! event was missed. Finding nothing is not an error: the history may simply
//! not contain the prompt yet. Failed sessions and sessions that already
//! hold a result are left alone.

use relay_comfyui::history::HistoryEntry;
use relay_core::events::ClientEvent;
use relay_core::image::ImageRef;
use relay_core::types::SessionId;

use crate::engine::RelayContext;

/// Look up the session's prompt in the engine history and record the first
/// output image that actually exists.
///
/// Returns the accepted image, if any.
pub async fn reconcile(ctx: &RelayContext, session_id: SessionId) -> Option<ImageRef> {
    let session = ctx.sessions.get(session_id).await?;
    if !session.accepts_result() {
        tracing::debug!(
            session_id = %session_id,
            status = session.status.as_str(),
            "Session already settled, skipping history check",
        );
        return None;
    }
    let Some(prompt_id) = session.engine_job_id else {
        tracing::debug!(session_id = %session_id, "No queued prompt, skipping history check");
        return None;
    };

    let history = match ctx.engine.history(&prompt_id).await {
        Ok(history) => history,
        Err(e) => {
            tracing::warn!(
                session_id = %session_id,
                prompt_id = %prompt_id,
                error = %e,
                "Failed to fetch history",
            );
            return None;
        }
    };

    let Some(entry) = HistoryEntry::from_history(&history, &prompt_id) else {
        tracing::debug!(session_id = %session_id, prompt_id = %prompt_id, "Prompt not in history yet");
        return None;
    };

    for (node_id, image) in entry.first_images() {
        match ctx.engine.image_exists(&image).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    session_id = %session_id,
                    node = %node_id,
                    filename = %image.filename,
                    "Output image not available, trying next node",
                );
                continue;
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    node = %node_id,
                    error = %e,
                    "Output image check failed, trying next node",
                );
                continue;
            }
        }

        let notification = ctx
            .sessions
            .update(session_id, |s| {
                if !s.matches_job(Some(prompt_id.as_str())) || !s.accepts_result() {
                    return None;
                }
                s.set_result(image.clone());
                ClientEvent::result(s).map(|event| (s.client_id.clone(), event))
            })
            .await
            .flatten();

        let Some((client_id, event)) = notification else {
            tracing::debug!(session_id = %session_id, "Session moved on, discarding result");
            return None;
        };

        tracing::info!(
            session_id = %session_id,
            prompt_id = %prompt_id,
            filename = %image.filename,
            "Result image found",
        );
        ctx.ws_manager.send(&client_id, &event).await;
        return Some(image);
    }

    tracing::debug!(session_id = %session_id, prompt_id = %prompt_id, "No output image in history");
    None
}
