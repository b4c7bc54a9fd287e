//! Job document decoding.
//!
//! A job document is the render engine's API-format workflow: a JSON object
//! where each key is a node id and each value describes one node:
//!
//! ```json
//! {
//!   "3": {
//!     "class_type": "KSampler",
//!     "_meta": { "title": "Sampler" },
//!     "inputs": { "seed": 42, "model": ["4", 0] }
//!   }
//! }
//! ```
//!
//! Nodes decode into [`WorkflowNode`]. The fields the relay reads are typed;
//! everything else is kept verbatim in `extra` so that re-encoding a node
//! reproduces the original structure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Presentation metadata of a node (`_meta`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single node of a job document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Engine node type (e.g. `"KSampler"`, `"LoadImage"`).
    pub class_type: String,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<NodeMeta>,
    /// Literal values and links (`[source_node_id, output_index]`).
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowNode {
    /// Display title, falling back to the class type.
    pub fn title(&self) -> &str {
        self.meta
            .as_ref()
            .and_then(|m| m.title.as_deref())
            .unwrap_or(&self.class_type)
    }
}

/// Id, type and title of a node, as shown to browser clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl NodeInfo {
    /// Placeholder for a node id that is not part of the document.
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            node_type: "Unknown".to_string(),
            title: None,
        }
    }
}

/// A decoded job document, keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct JobDocument {
    nodes: BTreeMap<String, WorkflowNode>,
}

impl JobDocument {
    /// Decode a job document from raw JSON.
    ///
    /// Fails with [`CoreError::Validation`] if the value is not an object or
    /// any node is not an object carrying a string `class_type`.
    pub fn from_value(json: &Value) -> Result<Self, CoreError> {
        let obj = json.as_object().ok_or_else(|| {
            CoreError::Validation("Workflow JSON must be an object".to_string())
        })?;

        let mut nodes = BTreeMap::new();
        for (node_id, node_value) in obj {
            if !node_value.is_object() {
                return Err(CoreError::Validation(format!(
                    "Node '{node_id}' must be an object"
                )));
            }
            let node: WorkflowNode = serde_json::from_value(node_value.clone()).map_err(|e| {
                CoreError::Validation(format!("Node '{node_id}' is invalid: {e}"))
            })?;
            nodes.insert(node_id.clone(), node);
        }

        Ok(Self { nodes })
    }

    /// Encode back into the JSON shape the render engine accepts.
    pub fn to_value(&self) -> Result<Value, CoreError> {
        serde_json::to_value(self)
            .map_err(|e| CoreError::Internal(format!("Failed to encode workflow: {e}")))
    }

    /// Reject documents without any node.
    pub fn ensure_not_empty(&self) -> Result<(), CoreError> {
        if self.nodes.is_empty() {
            return Err(CoreError::Validation(
                "Workflow JSON must contain at least one node".to_string(),
            ));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(node_id)
    }

    pub fn get_mut(&mut self, node_id: &str) -> Option<&mut WorkflowNode> {
        self.nodes.get_mut(node_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &WorkflowNode)> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut WorkflowNode)> {
        self.nodes.iter_mut()
    }

    /// Largest node id that parses as an integer (see [`leading_integer`]).
    pub fn max_numeric_id(&self) -> Option<i64> {
        self.nodes.keys().filter_map(|id| leading_integer(id)).max()
    }

    /// Describe a node for client display.
    pub fn node_info(&self, node_id: &str) -> NodeInfo {
        match self.nodes.get(node_id) {
            Some(node) => NodeInfo {
                id: node_id.to_string(),
                node_type: node.class_type.clone(),
                title: Some(node.title().to_string()),
            },
            None => NodeInfo::unknown(node_id),
        }
    }
}

/// Parse the leading integer of a node id.
///
/// Accepts optional surrounding whitespace and sign followed by at least one
/// digit; trailing characters are ignored, so grouped node ids such as
/// `"12:3"` yield `12`. Returns `None` when no digits lead the id.
pub fn leading_integer(id: &str) -> Option<i64> {
    let trimmed = id.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits_len == 0 {
        return None;
    }
    let value: i64 = rest[..digits_len].parse().ok()?;
    Some(if negative { -value } else { value })
}
