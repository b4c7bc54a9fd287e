//! File-backed job document store.
//!
//! Each document lives at `<dir>/<id>.json`; metadata for all documents is
//! kept in `<dir>/metadata.json`, keyed by id, and mirrored in memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use relay_core::document::JobDocument;
use relay_core::error::CoreError;
use relay_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

const METADATA_FILE: &str = "metadata.json";

/// Name used when an upload does not provide one.
pub const DEFAULT_WORKFLOW_NAME: &str = "Untitled Workflow";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub upload_time: Timestamp,
    pub node_count: usize,
    pub file_name: String,
}

pub struct WorkflowStore {
    dir: PathBuf,
    metadata: RwLock<BTreeMap<String, WorkflowMetadata>>,
}

impl WorkflowStore {
    /// Open the store at `dir`, creating the directory if needed and loading
    /// existing metadata.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error("create workflow directory", &dir, e))?;

        let metadata_path = dir.join(METADATA_FILE);
        let metadata = match tokio::fs::read(&metadata_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                CoreError::Internal(format!("Invalid {}: {e}", metadata_path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(io_error("read", &metadata_path, e)),
        };

        tracing::info!(dir = %dir.display(), count = metadata.len(), "Workflow store opened");

        Ok(Self {
            dir,
            metadata: RwLock::new(metadata),
        })
    }

    /// All stored workflows, newest first.
    pub async fn list(&self) -> Vec<WorkflowMetadata> {
        let mut all: Vec<WorkflowMetadata> = self.metadata.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.upload_time.cmp(&a.upload_time));
        all
    }

    pub async fn metadata(&self, id: &str) -> Result<WorkflowMetadata, CoreError> {
        self.metadata
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    /// Metadata plus the raw stored document.
    pub async fn get(&self, id: &str) -> Result<(WorkflowMetadata, serde_json::Value), CoreError> {
        let metadata = self.metadata(id).await?;
        let path = self.document_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found(id)),
            Err(e) => return Err(io_error("read", &path, e)),
        };
        let document = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::Internal(format!("Stored workflow {id} is invalid: {e}")))?;
        Ok((metadata, document))
    }

    /// Validate and persist a new document.
    pub async fn save(
        &self,
        name: Option<String>,
        description: Option<String>,
        document: serde_json::Value,
    ) -> Result<WorkflowMetadata, CoreError> {
        let decoded = JobDocument::from_value(&document)?;
        decoded.ensure_not_empty()?;

        let id = uuid::Uuid::new_v4().to_string();
        let file_name = format!("{id}.json");
        let path = self.dir.join(&file_name);
        let body = serde_json::to_vec_pretty(&document)
            .map_err(|e| CoreError::Internal(format!("Failed to encode workflow: {e}")))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| io_error("write", &path, e))?;

        let metadata = WorkflowMetadata {
            id: id.clone(),
            name: name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_WORKFLOW_NAME.to_string()),
            description: description.unwrap_or_default(),
            upload_time: chrono::Utc::now(),
            node_count: decoded.len(),
            file_name,
        };

        let mut all = self.metadata.write().await;
        all.insert(id.clone(), metadata.clone());
        self.persist(&all).await?;

        tracing::info!(workflow_id = %id, nodes = metadata.node_count, "Workflow stored");
        Ok(metadata)
    }

    /// Remove a document. Metadata is committed first; a document file that
    /// cannot be removed afterwards is only logged.
    pub async fn delete(&self, id: &str) -> Result<(), CoreError> {
        let mut all = self.metadata.write().await;
        if !all.contains_key(id) {
            return Err(not_found(id));
        }

        let mut remaining = all.clone();
        remaining.remove(id);
        self.persist(&remaining).await?;
        *all = remaining;

        let path = self.document_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    workflow_id = %id,
                    path = %path.display(),
                    error = %e,
                    "Workflow deleted but its document file remains",
                );
            }
        }

        tracing::info!(workflow_id = %id, "Workflow deleted");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.metadata.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.metadata.read().await.is_empty()
    }

    // Ids come from metadata, so only known ids ever reach the filesystem.
    fn document_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn persist(&self, all: &BTreeMap<String, WorkflowMetadata>) -> Result<(), CoreError> {
        let path = self.dir.join(METADATA_FILE);
        let body = serde_json::to_vec_pretty(all)
            .map_err(|e| CoreError::Internal(format!("Failed to encode metadata: {e}")))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| io_error("write", &path, e))
    }
}

fn not_found(id: &str) -> CoreError {
    CoreError::NotFound {
        entity: "Workflow",
        id: id.to_string(),
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> CoreError {
    CoreError::Internal(format!("Failed to {action} {}: {e}", path.display()))
}
