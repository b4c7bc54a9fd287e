//! Normalized events pushed to browser clients.
//!
//! Wire shape is `{"type": "...", "data": {...}}`, the contract the browser
//! UI already consumes.

use serde::Serialize;

use crate::document::NodeInfo;
use crate::session::{Session, SessionStatus};
use crate::types::SessionId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        progress: u8,
        current_node: String,
        node_info: NodeInfo,
        executed_nodes_count: usize,
        total_nodes: usize,
    },
    /// `node == None` is the terminal event.
    #[serde(rename_all = "camelCase")]
    Executing {
        node: Option<String>,
        #[serde(rename = "prompt_id", skip_serializing_if = "Option::is_none")]
        prompt_id: Option<String>,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        node_info: Option<NodeInfo>,
        executed_nodes_count: usize,
        total_nodes: usize,
    },
    #[serde(rename_all = "camelCase")]
    Result {
        session_id: SessionId,
        status: SessionStatus,
        result_image: String,
        executed_nodes_count: usize,
        total_nodes: usize,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
    },
}

impl ClientEvent {
    /// Progress for the session's current node, if it has one.
    pub fn progress(session: &Session) -> Option<Self> {
        let node = session.current_node_id.clone()?;
        Some(Self::Progress {
            progress: session.progress_percent,
            node_info: session.node_info(&node),
            current_node: node,
            executed_nodes_count: session.executed_count(),
            total_nodes: session.total_nodes(),
        })
    }

    pub fn executing(session: &Session, node_id: &str) -> Self {
        Self::Executing {
            node: Some(node_id.to_string()),
            prompt_id: None,
            progress: session.progress_percent,
            node_info: Some(session.node_info(node_id)),
            executed_nodes_count: session.executed_count(),
            total_nodes: session.total_nodes(),
        }
    }

    pub fn finished(session: &Session) -> Self {
        Self::Executing {
            node: None,
            prompt_id: session.engine_job_id.clone(),
            progress: session.progress_percent,
            node_info: None,
            executed_nodes_count: session.executed_count(),
            total_nodes: session.total_nodes(),
        }
    }

    /// `None` until a result image is known.
    pub fn result(session: &Session) -> Option<Self> {
        let image = session.result_image.as_ref()?;
        Some(Self::Result {
            session_id: session.id,
            status: session.status,
            result_image: image.proxy_url(),
            executed_nodes_count: session.executed_count(),
            total_nodes: session.total_nodes(),
        })
    }

    pub fn error(message: impl Into<String>, node_id: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            node_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Progress { .. } => "progress",
            ClientEvent::Executing { .. } => "executing",
            ClientEvent::Result { .. } => "result",
            ClientEvent::Error { .. } => "error",
        }
    }
}
