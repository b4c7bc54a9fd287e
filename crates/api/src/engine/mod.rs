//! Render-engine event bridge.
//!
//! One push connection per session ([`bridge`]), a consumer that applies
//! engine messages to the session store and notifies the browser
//! ([`relay`]), and the history fallback used when a terminal event is
//! missed ([`reconcile`]).

pub mod bridge;
pub mod reconcile;
pub mod relay;

use std::sync::Arc;

use relay_comfyui::engine::RenderEngine;

use crate::sessions::SessionStore;
use crate::ws::WsManager;

pub use bridge::{BridgeManager, BridgeState};

/// Everything the relay needs to process engine messages.
#[derive(Clone)]
pub struct RelayContext {
    pub sessions: Arc<SessionStore>,
    pub ws_manager: Arc<WsManager>,
    pub engine: Arc<dyn RenderEngine>,
}
