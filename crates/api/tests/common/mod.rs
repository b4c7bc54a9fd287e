#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use relay_comfyui::api::{ComfyUIApiError, FetchedImage, SubmitResponse, UploadResponse};
use relay_comfyui::client::ComfyUIClientError;
use relay_comfyui::engine::{EngineSubscription, RenderEngine, EVENT_BUFFER};
use relay_comfyui::messages::{parse_message, ComfyUIMessage};
use relay_core::image::ImageRef;
use relay_core::mutation::prepare_document;
use relay_core::types::SessionId;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

use relay_api::config::ServerConfig;
use relay_api::router::build_app_router;
use relay_api::state::AppState;
use relay_api::workflows::WorkflowStore;

// ---------------------------------------------------------------------------
// Fake render engine
// ---------------------------------------------------------------------------

/// In-memory stand-in for ComfyUI.
///
/// Every call is recorded; outcomes are configured through the public
/// fields before the call is made.
#[derive(Default)]
pub struct FakeEngine {
    /// Prompt id returned by the next successful submit.
    pub prompt_id: Mutex<String>,
    /// When set, submit fails with this status.
    pub submit_failure: Mutex<Option<u16>>,
    pub submitted: Mutex<Vec<(Value, String)>>,
    /// History responses by prompt id.
    pub history: Mutex<HashMap<String, Value>>,
    pub history_calls: Mutex<Vec<String>>,
    /// Filenames the existence check reports as present.
    pub existing: Mutex<HashSet<String>>,
    /// Filenames whose existence check errors.
    pub failing_checks: Mutex<HashSet<String>>,
    /// Images served by fetch, keyed by `(filename, subfolder)`.
    pub images: Mutex<HashMap<(String, String), FetchedImage>>,
    pub fetches: Mutex<Vec<ImageRef>>,
    /// Names passed to upload.
    pub uploads: Mutex<Vec<String>>,
    pub upload_failure: Mutex<Option<u16>>,
    /// Push channel senders by client id.
    pub subscribers: Mutex<HashMap<String, mpsc::Sender<ComfyUIMessage>>>,
    pub subscribe_failure: Mutex<bool>,
    /// Frames pushed to the submitting client before submit returns.
    pub submit_frames: Mutex<Vec<Value>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        let engine = Self::default();
        *engine.prompt_id.lock().unwrap() = "prompt-1".to_string();
        Arc::new(engine)
    }

    pub fn set_history(&self, prompt_id: &str, history: Value) {
        self.history
            .lock()
            .unwrap()
            .insert(prompt_id.to_string(), history);
    }

    pub fn mark_existing(&self, filename: &str) {
        self.existing.lock().unwrap().insert(filename.to_string());
    }

    pub fn fail_check(&self, filename: &str) {
        self.failing_checks
            .lock()
            .unwrap()
            .insert(filename.to_string());
    }

    pub fn serve_image(&self, filename: &str, subfolder: &str, content_type: &str, bytes: &[u8]) {
        self.images.lock().unwrap().insert(
            (filename.to_string(), subfolder.to_string()),
            FetchedImage {
                content_type: Some(content_type.to_string()),
                bytes: bytes.to_vec(),
            },
        );
    }

    /// Make the next submit push `frames` to the client before answering,
    /// as a fully cached job does.
    pub fn emit_during_submit(&self, frames: Vec<Value>) {
        *self.submit_frames.lock().unwrap() = frames;
    }

    pub fn sender(&self, client_id: &str) -> Option<mpsc::Sender<ComfyUIMessage>> {
        self.subscribers.lock().unwrap().get(client_id).cloned()
    }

    /// Push a raw engine frame to the subscription of `client_id`.
    pub async fn emit(&self, client_id: &str, frame: Value) {
        let sender = self.sender(client_id).expect("client is not subscribed");
        sender
            .send(parse_message(&frame.to_string()).expect("valid engine frame"))
            .await
            .expect("subscription still open");
    }
}

fn api_error(status: u16) -> ComfyUIApiError {
    ComfyUIApiError::ApiError {
        status,
        body: "fake engine failure".to_string(),
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn submit(
        &self,
        document: &Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        if let Some(status) = *self.submit_failure.lock().unwrap() {
            return Err(api_error(status));
        }
        self.submitted
            .lock()
            .unwrap()
            .push((document.clone(), client_id.to_string()));

        let frames = std::mem::take(&mut *self.submit_frames.lock().unwrap());
        if !frames.is_empty() {
            for frame in frames {
                self.emit(client_id, frame).await;
            }
            // Give the bridge time to consume them before the prompt id is known.
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        Ok(SubmitResponse {
            prompt_id: self.prompt_id.lock().unwrap().clone(),
            number: 1,
        })
    }

    async fn history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        self.history_calls
            .lock()
            .unwrap()
            .push(prompt_id.to_string());
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(prompt_id)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({})))
    }

    async fn image_exists(&self, image: &ImageRef) -> Result<bool, ComfyUIApiError> {
        if self.failing_checks.lock().unwrap().contains(&image.filename) {
            return Err(api_error(500));
        }
        Ok(self.existing.lock().unwrap().contains(&image.filename))
    }

    async fn fetch_image(&self, image: &ImageRef) -> Result<FetchedImage, ComfyUIApiError> {
        self.fetches.lock().unwrap().push(image.clone());
        self.images
            .lock()
            .unwrap()
            .get(&(image.filename.clone(), image.subfolder.clone()))
            .cloned()
            .ok_or_else(|| api_error(404))
    }

    async fn upload_image(
        &self,
        filename: &str,
        _content_type: Option<&str>,
        _bytes: Vec<u8>,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        if let Some(status) = *self.upload_failure.lock().unwrap() {
            return Err(api_error(status));
        }
        self.uploads.lock().unwrap().push(filename.to_string());
        Ok(UploadResponse {
            name: filename.to_string(),
            subfolder: String::new(),
            kind: Some("input".to_string()),
        })
    }

    async fn subscribe(&self, client_id: &str) -> Result<EngineSubscription, ComfyUIClientError> {
        if *self.subscribe_failure.lock().unwrap() {
            return Err(ComfyUIClientError::Connection("refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.subscribers
            .lock()
            .unwrap()
            .insert(client_id.to_string(), tx);
        Ok(EngineSubscription::from_receiver(rx))
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults rooted at `dir`.
pub fn test_config(dir: &std::path::Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        comfyui_url: "http://comfyui.test".to_string(),
        comfyui_ws_url: "ws://comfyui.test".to_string(),
        workflows_dir: dir.join("workflows"),
        static_dir: dir.join("public"),
        max_upload_bytes: 1024 * 1024,
        session_ttl_secs: 3600,
        session_idle_ttl_secs: 86400,
        session_sweep_interval_secs: 60,
        log_json: false,
    }
}

/// The full application wired to a [`FakeEngine`].
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub engine: Arc<FakeEngine>,
    pub dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let static_dir: PathBuf = config.static_dir.clone();
        std::fs::create_dir_all(&static_dir).unwrap();
        std::fs::write(static_dir.join("index.html"), "<html>relay</html>").unwrap();

        let workflows = WorkflowStore::open(&config.workflows_dir).await.unwrap();
        let engine = FakeEngine::new();
        let state = AppState::new(config, engine.clone(), workflows);
        let router = build_app_router(state.clone());

        Self {
            router,
            state,
            engine,
            dir,
        }
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
        self.request(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_multipart(&self, uri: &str, parts: &[Part<'_>]) -> Response<Body> {
        let (content_type, body) = multipart_body(parts);
        self.request(
            Request::post(uri)
                .header("content-type", content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    /// Store a workflow directly and return its id.
    pub async fn store_workflow(&self, document: Value) -> String {
        self.state
            .workflows
            .save(Some("Test".into()), None, document)
            .await
            .unwrap()
            .id
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Loader, sampler, save: three nodes with ids 1..=3.
pub fn three_node_workflow() -> Value {
    serde_json::json!({
        "1": { "class_type": "LoadImage", "_meta": { "title": "Source" }, "inputs": { "image": "placeholder.png" } },
        "2": { "class_type": "KSampler", "inputs": { "seed": 1, "steps": 20 } },
        "3": { "class_type": "SaveImage", "_meta": { "title": "Save Image" }, "inputs": { "images": ["2", 0] } }
    })
}

/// A session created in the store, prepared with `document` and queued as
/// `prompt_id`.
pub async fn queued_session(state: &AppState, document: &Value, prompt_id: &str) -> SessionId {
    let session = state.sessions.create().await;
    let prepared = prepare_document(document, None, None).unwrap();
    state
        .sessions
        .update(session.id, |s| {
            s.begin_execution(prepared);
            s.mark_queued(prompt_id);
        })
        .await
        .unwrap();
    session.id
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub fn assert_status(response: &Response<Body>, status: StatusCode) {
    assert_eq!(response.status(), status);
}

/// One part of a multipart form.
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub data: &'a [u8],
}

impl<'a> Part<'a> {
    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            filename: None,
            content_type: None,
            data: value.as_bytes(),
        }
    }

    pub fn file(name: &'a str, filename: &'a str, content_type: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            filename: Some(filename),
            content_type: Some(content_type),
            data,
        }
    }
}

const BOUNDARY: &str = "relay-test-boundary";

pub fn multipart_body(parts: &[Part<'_>]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = part.filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}
