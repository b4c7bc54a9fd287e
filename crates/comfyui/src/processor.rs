//! WebSocket frame reading loop.
//!
//! Reads raw frames from a ComfyUI WebSocket connection, parses them into
//! typed [`ComfyUIMessage`] variants and forwards them, in arrival order,
//! to the consumer of one session.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::client::EngineStream;
use crate::messages::{parse_message, ComfyUIMessage, ProtocolError};

/// Forward messages from a ComfyUI connection until the WebSocket closes,
/// a receive error occurs, or the consumer goes away.
///
/// Binary frames (preview images) are ignored. Frames that do not parse are
/// logged and dropped.
pub async fn forward_messages(
    mut ws_stream: EngineStream,
    client_id: String,
    tx: mpsc::Sender<ComfyUIMessage>,
) {
    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let Some(msg) = decode_text(&text, &client_id) else {
                    continue;
                };
                if tx.send(msg).await.is_err() {
                    tracing::debug!(client_id = %client_id, "Consumer gone, stopping reader");
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::trace!(client_id = %client_id, "Ignoring binary message (preview image)");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(client_id = %client_id, ?frame, "ComfyUI WebSocket closed");
                break;
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::error!(client_id = %client_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }
}

/// Parse one text frame, logging anything that is dropped.
pub fn decode_text(text: &str, client_id: &str) -> Option<ComfyUIMessage> {
    match parse_message(text) {
        Ok(msg) => Some(msg),
        Err(ProtocolError::UnknownType(kind)) => {
            tracing::debug!(client_id = %client_id, kind = %kind, "Ignoring ComfyUI message type");
            None
        }
        Err(e) => {
            tracing::warn!(
                client_id = %client_id,
                error = %e,
                raw_message = %text,
                "Failed to parse ComfyUI message",
            );
            None
        }
    }
}
