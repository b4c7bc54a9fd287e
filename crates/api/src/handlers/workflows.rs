//! Handlers for stored job documents.

use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::Success;
use crate::state::AppState;
use crate::workflows::WorkflowMetadata;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct WorkflowList {
    pub workflows: Vec<WorkflowMetadata>,
}

/// Metadata with the stored document under `data`.
#[derive(Debug, Serialize)]
pub struct WorkflowDetail {
    #[serde(flatten)]
    pub metadata: WorkflowMetadata,
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct WorkflowEnvelope<T: Serialize> {
    pub workflow: T,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

// ---------------------------------------------------------------------------
// GET /workflows
// ---------------------------------------------------------------------------

/// List stored workflows, newest first.
pub async fn list_workflows(State(state): State<AppState>) -> Json<Success<WorkflowList>> {
    let workflows = state.workflows.list().await;
    tracing::debug!(count = workflows.len(), "Listed workflows");
    Json(Success::new(WorkflowList { workflows }))
}

// ---------------------------------------------------------------------------
// GET /workflows/{id}
// ---------------------------------------------------------------------------

pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Success<WorkflowEnvelope<WorkflowDetail>>>> {
    let (metadata, data) = state.workflows.get(&id).await?;
    Ok(Json(Success::new(WorkflowEnvelope {
        workflow: WorkflowDetail { metadata, data },
    })))
}

// ---------------------------------------------------------------------------
// POST /upload-workflow
// ---------------------------------------------------------------------------

/// Store a job document.
///
/// Accepts a multipart form with a required `workflow` JSON file and
/// optional `name` and `description` fields.
pub async fn upload_workflow(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<Success<WorkflowEnvelope<WorkflowMetadata>>>> {
    let mut document: Option<serde_json::Value> = None;
    let mut name: Option<String> = None;
    let mut description: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "workflow" => {
                if !is_json_upload(field.content_type(), field.file_name()) {
                    return Err(AppError::BadRequest(
                        "Only JSON workflow files are allowed".into(),
                    ));
                }
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                let parsed = serde_json::from_slice(&data).map_err(|e| {
                    AppError::BadRequest(format!("Workflow file is not valid JSON: {e}"))
                })?;
                document = Some(parsed);
            }
            "name" => name = Some(text_field(field).await?),
            "description" => description = Some(text_field(field).await?),
            _ => {}
        }
    }

    let document =
        document.ok_or_else(|| AppError::BadRequest("No workflow file uploaded".into()))?;

    let workflow = state.workflows.save(name, description, document).await?;
    Ok(Json(Success::new(WorkflowEnvelope { workflow })))
}

// ---------------------------------------------------------------------------
// DELETE /workflows/{id}
// ---------------------------------------------------------------------------

pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Success<MessageResponse>>> {
    state.workflows.delete(&id).await?;
    Ok(Json(Success::new(MessageResponse {
        message: "Workflow deleted successfully",
    })))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn text_field(field: axum::extract::multipart::Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

/// JSON by declared content type, or by extension when the browser sent a
/// generic one.
fn is_json_upload(content_type: Option<&str>, file_name: Option<&str>) -> bool {
    match content_type {
        Some(ct) if ct.contains("json") => true,
        Some(ct) if ct != "application/octet-stream" => false,
        _ => file_name.is_some_and(|f| f.to_ascii_lowercase().ends_with(".json")),
    }
}
