//! Relay session model.
//!
//! A [`Session`] is one execution attempt: it correlates a browser client
//! with a job on the render engine and owns every piece of mutable job
//! state. The transition methods below are the only way state changes, so
//! that the push relay, history reconciliation and the HTTP surface all
//! apply the same rules.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::document::{JobDocument, NodeInfo};
use crate::image::{ImageRef, UploadedImage};
use crate::mutation::PreparedDocument;
use crate::progress::estimate_progress;
use crate::types::{SessionId, Timestamp};

/// Status message reported before anything has happened.
pub const DEFAULT_STATUS_MESSAGE: &str = "Initializing";

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Initialized,
    ImageUploaded,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Initialized => "initialized",
            SessionStatus::ImageUploaded => "image_uploaded",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// No further engine events are expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// Key of the browser push connection and the engine `clientId`.
    pub client_id: String,
    pub status: SessionStatus,
    pub source_document: Option<JobDocument>,
    /// Document as submitted to the engine.
    pub job_document: Option<JobDocument>,
    pub uploaded_image: Option<UploadedImage>,
    /// Prompt id assigned by the engine once queued.
    pub engine_job_id: Option<String>,
    pub executed_node_ids: BTreeSet<String>,
    /// Last reported fractional progress (0..=1) per node.
    pub node_progress: HashMap<String, f64>,
    pub current_node_id: Option<String>,
    pub progress_percent: u8,
    pub result_image: Option<ImageRef>,
    pub message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            client_id: id.client_id(),
            status: SessionStatus::Initialized,
            source_document: None,
            job_document: None,
            uploaded_image: None,
            engine_job_id: None,
            executed_node_ids: BTreeSet::new(),
            node_progress: HashMap::new(),
            current_node_id: None,
            progress_percent: 0,
            result_image: None,
            message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }

    /// Record an image the engine accepted for this session.
    pub fn attach_image(&mut self, image: UploadedImage) {
        self.uploaded_image = Some(image);
        self.status = SessionStatus::ImageUploaded;
        self.message = Some("Image uploaded".to_string());
        self.touch();
    }

    /// Install freshly prepared documents and clear every trace of a
    /// previous run. The status is left alone until the engine accepts
    /// the job.
    pub fn begin_execution(&mut self, prepared: PreparedDocument) {
        self.source_document = Some(prepared.source);
        self.job_document = Some(prepared.submitted);
        self.engine_job_id = None;
        self.executed_node_ids.clear();
        self.node_progress.clear();
        self.current_node_id = None;
        self.progress_percent = 0;
        self.result_image = None;
        self.message = None;
        self.started_at = None;
        self.finished_at = None;
        self.touch();
    }

    /// The engine queued the job under `prompt_id`. A run that already
    /// reached a terminal state keeps it.
    pub fn mark_queued(&mut self, prompt_id: impl Into<String>) {
        self.engine_job_id = Some(prompt_id.into());
        self.started_at.get_or_insert_with(chrono::Utc::now);
        if self.finished_at.is_none() {
            self.status = SessionStatus::Processing;
            self.progress_percent = 0;
            self.message = Some("Workflow queued".to_string());
        }
        self.touch();
    }

    /// Record fractional progress for a node. Without a node id the
    /// current node is assumed; with neither, only the timestamp moves.
    pub fn record_progress(&mut self, node_id: Option<&str>, fraction: f64) {
        let node = node_id
            .map(str::to_string)
            .or_else(|| self.current_node_id.clone());
        if let Some(node) = node {
            self.node_progress.insert(node.clone(), fraction.clamp(0.0, 1.0));
            self.progress_percent = self.estimate(Some(&node));
            self.current_node_id = Some(node);
        }
        self.touch();
    }

    /// The engine started executing `node_id`.
    pub fn record_executing(&mut self, node_id: &str) {
        self.executed_node_ids.insert(node_id.to_string());
        self.current_node_id = Some(node_id.to_string());
        self.progress_percent = self.estimate(Some(node_id));
        self.touch();
    }

    /// The engine finished a node. Bookkeeping only.
    pub fn record_executed(&mut self, node_id: &str) {
        self.executed_node_ids.insert(node_id.to_string());
        self.touch();
    }

    /// The engine reported that no further nodes will run.
    pub fn complete(&mut self) {
        self.status = SessionStatus::Completed;
        self.progress_percent = 100;
        self.current_node_id = None;
        self.finished_at = Some(chrono::Utc::now());
        self.message = Some("Workflow completed".to_string());
        self.touch();
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = SessionStatus::Failed;
        self.message = Some(message.into());
        self.finished_at = Some(chrono::Utc::now());
        self.touch();
    }

    /// Whether a result image found in the engine history may still be
    /// recorded. Failed runs and runs that already have one are done.
    pub fn accepts_result(&self) -> bool {
        self.status != SessionStatus::Failed && self.result_image.is_none()
    }

    /// Store the located result image. Implies completion.
    pub fn set_result(&mut self, image: ImageRef) {
        self.result_image = Some(image);
        self.status = SessionStatus::Completed;
        self.progress_percent = 100;
        self.finished_at.get_or_insert_with(chrono::Utc::now);
        self.touch();
    }

    /// Document used for node lookups: the submitted one.
    pub fn document(&self) -> Option<&JobDocument> {
        self.job_document.as_ref()
    }

    pub fn estimate(&self, node_id: Option<&str>) -> u8 {
        estimate_progress(node_id, self.document())
    }

    pub fn node_info(&self, node_id: &str) -> NodeInfo {
        match self.document() {
            Some(doc) => doc.node_info(node_id),
            None => NodeInfo::unknown(node_id),
        }
    }

    pub fn total_nodes(&self) -> usize {
        self.document().map(JobDocument::len).unwrap_or(0)
    }

    pub fn executed_count(&self) -> usize {
        self.executed_node_ids.len()
    }

    /// Whether an engine event tagged with `prompt_id` belongs to the
    /// current job. Untagged events are accepted.
    pub fn matches_job(&self, prompt_id: Option<&str>) -> bool {
        match (prompt_id, self.engine_job_id.as_deref()) {
            (Some(event), Some(current)) => event == current,
            _ => true,
        }
    }

    /// Finished sessions expire `ttl` after finishing; unfinished ones
    /// after `idle_ttl` without any update.
    pub fn is_evictable(
        &self,
        now: Timestamp,
        ttl: chrono::Duration,
        idle_ttl: chrono::Duration,
    ) -> bool {
        match self.finished_at {
            Some(finished) => now - finished >= ttl,
            None => now - self.updated_at >= idle_ttl,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            status: self.status,
            progress: self.progress_percent,
            current_node: self.current_node_id.clone(),
            current_node_info: self.current_node_id.as_deref().map(|id| self.node_info(id)),
            message: self
                .message
                .clone()
                .unwrap_or_else(|| DEFAULT_STATUS_MESSAGE.to_string()),
            result_image: self.result_image.as_ref().map(ImageRef::proxy_url),
            prompt_id: self.engine_job_id.clone(),
            uploaded_image: self.uploaded_image.as_ref().map(|i| i.filename.clone()),
            start_time: self.started_at,
            end_time: self.finished_at,
            executed_nodes_count: self.executed_count(),
            total_nodes: self.total_nodes(),
        }
    }
}

/// Point-in-time view served to polling clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub progress: u8,
    pub current_node: Option<String>,
    pub current_node_info: Option<NodeInfo>,
    pub message: String,
    pub result_image: Option<String>,
    pub prompt_id: Option<String>,
    pub uploaded_image: Option<String>,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub executed_nodes_count: usize,
    pub total_nodes: usize,
}
