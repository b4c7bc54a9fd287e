use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;
use crate::ws::manager::WsManager;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

/// GET /ws?clientId=...
///
/// Upgrades to a WebSocket registered under the given client id. The
/// client id is checked before the upgrade so a missing one is a plain 400.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(client_id) = query
        .client_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
    else {
        return AppError::BadRequest("clientId query parameter is required".to_string())
            .into_response();
    };

    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, client_id, state.ws_manager))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with `WsManager`.
///   2. Spawns a sender task that forwards messages from the manager channel.
///   3. Drains inbound messages until the client goes away.
///   4. Unregisters, unless a newer connection took over the client id.
async fn handle_socket(socket: WebSocket, client_id: String, ws_manager: Arc<WsManager>) {
    tracing::info!(client_id = %client_id, "Client WebSocket connected");

    let (token, mut rx) = ws_manager.register(&client_id).await;

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_client_id = client_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(client_id = %sender_client_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Nothing is consumed from the browser beyond lifecycle frames.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(client_id = %client_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(client_id = %client_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    let removed = ws_manager.unregister(&client_id, token).await;
    send_task.abort();
    tracing::info!(client_id = %client_id, removed, "Client WebSocket disconnected");
}
