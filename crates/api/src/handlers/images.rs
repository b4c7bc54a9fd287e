//! Handlers for engine images: input uploads and the output proxy.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_core::error::CoreError;
use relay_core::image::{ImageKind, ImageRef, UploadedImage};
use relay_core::types::SessionId;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::Success;
use crate::state::AppState;

/// Name used when the browser sends a file without one.
const DEFAULT_UPLOAD_NAME: &str = "upload.png";

// ---------------------------------------------------------------------------
// POST /upload-image
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadImageResponse {
    pub session_id: SessionId,
    pub message: &'static str,
    pub image_url: String,
}

/// Forward an input image to the engine and attach it to a session.
///
/// Accepts a multipart form with a required `image` field and an optional
/// `sessionId`. Without a session id a new session is created; an unknown
/// one is rejected. The session is only touched once the engine accepted
/// the file.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<Success<UploadImageResponse>>> {
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut session_field: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => {
                let content_type = field.content_type().map(str::to_string);
                if !content_type
                    .as_deref()
                    .is_some_and(|ct| ct.starts_with("image/"))
                {
                    return Err(AppError::BadRequest("Only image files are allowed".into()));
                }
                let filename = base_name(field.file_name().unwrap_or(DEFAULT_UPLOAD_NAME));
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                file = Some((filename, content_type, data.to_vec()));
            }
            "sessionId" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                session_field = Some(text.trim().to_string()).filter(|s| !s.is_empty());
            }
            _ => {}
        }
    }

    let (original_filename, content_type, data) =
        file.ok_or_else(|| AppError::BadRequest("No image file uploaded".into()))?;

    let existing = match session_field {
        Some(raw) => {
            let id = raw
                .parse::<SessionId>()
                .map_err(|_| AppError::BadRequest(format!("Unknown session {raw}")))?;
            if !state.sessions.contains(id).await {
                return Err(AppError::BadRequest(format!("Unknown session {raw}")));
            }
            Some(id)
        }
        None => None,
    };

    let stored_name = format!(
        "{}-{}",
        chrono::Utc::now().timestamp_millis(),
        original_filename
    );
    let uploaded = state
        .engine
        .upload_image(&stored_name, content_type.as_deref(), data)
        .await?;

    let image = UploadedImage {
        filename: uploaded.name,
        subfolder: uploaded.subfolder,
        original_filename,
        uploaded_at: chrono::Utc::now(),
    };
    let image_url = image.image_ref().proxy_url();

    let session_id = match existing {
        Some(id) => id,
        None => state.sessions.create().await.id,
    };
    state
        .sessions
        .update(session_id, |s| s.attach_image(image))
        .await
        .ok_or_else(|| CoreError::NotFound {
            entity: "Session",
            id: session_id.to_string(),
        })?;

    tracing::info!(
        session_id = %session_id,
        filename = %stored_name,
        "Input image uploaded",
    );

    Ok(Json(Success::new(UploadImageResponse {
        session_id,
        message: "Image uploaded successfully",
        image_url,
    })))
}

/// Strip any client-side directory from an uploaded file name.
fn base_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if base.is_empty() {
        DEFAULT_UPLOAD_NAME.to_string()
    } else {
        base.to_string()
    }
}

// ---------------------------------------------------------------------------
// GET /images/{filename}
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub subfolder: Option<String>,
}

/// Stream an image from the engine.
///
/// Output images are retried once without their subfolder, since history
/// entries do not always report where the file ended up.
pub async fn proxy_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<ImageQuery>,
) -> AppResult<Response> {
    let kind = match query.kind.as_deref().filter(|k| !k.is_empty()) {
        Some(k) => k.parse::<ImageKind>()?,
        None => ImageKind::Output,
    };
    let image = ImageRef::new(filename, query.subfolder.unwrap_or_default(), kind);

    let fetched = match state.engine.fetch_image(&image).await {
        Ok(fetched) => fetched,
        Err(e) if kind == ImageKind::Output && !image.subfolder.is_empty() => {
            tracing::debug!(
                filename = %image.filename,
                subfolder = %image.subfolder,
                error = %e,
                "Image not found in subfolder, retrying at output root",
            );
            let root = ImageRef::new(&image.filename, "", kind);
            state.engine.fetch_image(&root).await?
        }
        Err(e) => return Err(e.into()),
    };

    let content_type = fetched
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));

    Ok(([(CONTENT_TYPE, content_type)], fetched.bytes).into_response())
}
