use std::sync::Arc;

use relay_comfyui::engine::RenderEngine;

use crate::config::ServerConfig;
use crate::engine::{BridgeManager, RelayContext};
use crate::sessions::SessionStore;
use crate::workflows::WorkflowStore;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// All relay sessions of this process.
    pub sessions: Arc<SessionStore>,
    /// Browser push connections.
    pub ws_manager: Arc<WsManager>,
    /// ComfyUI, or a stand-in under test.
    pub engine: Arc<dyn RenderEngine>,
    /// Per-session engine connections.
    pub bridges: Arc<BridgeManager>,
    /// Stored job documents.
    pub workflows: Arc<WorkflowStore>,
}

impl AppState {
    /// Wire up fresh session, connection and bridge registries around the
    /// given engine and workflow store.
    pub fn new(
        config: ServerConfig,
        engine: Arc<dyn RenderEngine>,
        workflows: WorkflowStore,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new());
        let ws_manager = Arc::new(WsManager::new());
        let bridges = Arc::new(BridgeManager::new(RelayContext {
            sessions: Arc::clone(&sessions),
            ws_manager: Arc::clone(&ws_manager),
            engine: Arc::clone(&engine),
        }));

        Self {
            config: Arc::new(config),
            sessions,
            ws_manager,
            engine,
            bridges,
            workflows: Arc::new(workflows),
        }
    }

    pub fn relay_context(&self) -> RelayContext {
        RelayContext {
            sessions: Arc::clone(&self.sessions),
            ws_manager: Arc::clone(&self.ws_manager),
            engine: Arc::clone(&self.engine),
        }
    }
}
