//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`ComfyUIMessage`] enum.
//!
//! Payload fields the relay does not strictly need are optional: ComfyUI
//! versions differ in what they include, and a missing `prompt_id` must not
//! cost us a terminal event.

use serde::Deserialize;

/// All known ComfyUI WebSocket message types.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth, etc.).
    #[serde(rename = "status")]
    Status(StatusData),

    /// A prompt has started executing.
    #[serde(rename = "execution_start")]
    ExecutionStart(PromptData),

    /// Some nodes were skipped because their outputs are cached.
    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// A node has finished and produced output.
    #[serde(rename = "executed")]
    Executed(ExecutedData),

    /// All nodes of a prompt ran successfully.
    #[serde(rename = "execution_success")]
    ExecutionSuccess(PromptData),

    /// Execution failed with an error.
    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),

    /// Execution was interrupted by a user or admin.
    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(InterruptedData),
}

/// Every `type` value [`ComfyUIMessage`] decodes.
pub const KNOWN_TYPES: [&str; 9] = [
    "status",
    "execution_start",
    "execution_cached",
    "executing",
    "progress",
    "executed",
    "execution_success",
    "execution_error",
    "execution_interrupted",
];

impl ComfyUIMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ComfyUIMessage::Status(_) => "status",
            ComfyUIMessage::ExecutionStart(_) => "execution_start",
            ComfyUIMessage::ExecutionCached(_) => "execution_cached",
            ComfyUIMessage::Executing(_) => "executing",
            ComfyUIMessage::Progress(_) => "progress",
            ComfyUIMessage::Executed(_) => "executed",
            ComfyUIMessage::ExecutionSuccess(_) => "execution_success",
            ComfyUIMessage::ExecutionError(_) => "execution_error",
            ComfyUIMessage::ExecutionInterrupted(_) => "execution_interrupted",
        }
    }

    /// Prompt the message refers to, when ComfyUI included one.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            ComfyUIMessage::Status(_) => None,
            ComfyUIMessage::ExecutionStart(d) | ComfyUIMessage::ExecutionSuccess(d) => {
                d.prompt_id.as_deref()
            }
            ComfyUIMessage::ExecutionCached(d) => d.prompt_id.as_deref(),
            ComfyUIMessage::Executing(d) => d.prompt_id.as_deref(),
            ComfyUIMessage::Progress(d) => d.prompt_id.as_deref(),
            ComfyUIMessage::Executed(d) => d.prompt_id.as_deref(),
            ComfyUIMessage::ExecutionError(d) => d.prompt_id.as_deref(),
            ComfyUIMessage::ExecutionInterrupted(d) => d.prompt_id.as_deref(),
        }
    }
}

/// Queue status information.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusData {
    #[serde(default)]
    pub status: Option<QueueStatus>,
}

impl StatusData {
    pub fn queue_remaining(&self) -> Option<i64> {
        self.status
            .as_ref()
            .and_then(|s| s.exec_info.as_ref())
            .and_then(|e| e.queue_remaining)
    }
}

/// Current queue state.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueStatus {
    #[serde(default)]
    pub exec_info: Option<ExecInfo>,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecInfo {
    #[serde(default)]
    pub queue_remaining: Option<i64>,
}

/// Payload carrying only a prompt id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptData {
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, execution of the prompt has completed.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: f64,
    /// Total number of steps.
    #[serde(default)]
    pub max: f64,
    /// Node reporting progress. Older servers send `id`.
    #[serde(default, alias = "id")]
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

impl ProgressData {
    /// Step progress as a fraction. Without a usable `max` the raw value
    /// is taken as the fraction.
    pub fn fraction(&self) -> f64 {
        if self.max > 0.0 {
            self.value / self.max
        } else {
            self.value
        }
    }
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    /// The node that produced this output.
    pub node: String,
    /// Raw output value (images, filenames, etc.).
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_message: Option<String>,
    #[serde(default)]
    pub exception_type: Option<String>,
}

impl ErrorData {
    pub fn message(&self) -> &str {
        self.exception_message
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or("Unknown execution error")
    }
}

/// Payload for `execution_interrupted` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct InterruptedData {
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
}

/// Why a push-channel frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON, no `type`, or a known type with an unexpected payload.
    #[error("Malformed ComfyUI message: {0}")]
    Malformed(String),

    /// Well-formed envelope of a type the relay does not handle.
    #[error("Unknown ComfyUI message type: {0}")]
    UnknownType(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Callers should log and drop errors; unknown types are expected as
/// ComfyUI grows new ones.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let envelope: Envelope = serde_json::from_value(value.clone())
        .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if !KNOWN_TYPES.contains(&envelope.kind.as_str()) {
        return Err(ProtocolError::UnknownType(envelope.kind));
    }

    serde_json::from_value(value)
        .map_err(|e| ProtocolError::Malformed(format!("{}: {e}", envelope.kind)))
}
