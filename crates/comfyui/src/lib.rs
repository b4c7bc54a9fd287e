//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed push-channel message parsing, the per-session WebSocket
//! connection, HTTP API wrappers, history parsing, and the [`RenderEngine`]
//! seam the relay server depends on.
//!
//! [`RenderEngine`]: engine::RenderEngine

pub mod api;
pub mod client;
pub mod engine;
pub mod history;
pub mod messages;
pub mod processor;
