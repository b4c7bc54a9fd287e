//! The render-engine seam.
//!
//! The relay server talks to ComfyUI only through [`RenderEngine`], so the
//! HTTP surface and the event relay can be driven by an in-memory engine in
//! tests. [`ComfyUIEngine`] is the production implementation.

use async_trait::async_trait;
use relay_core::image::ImageRef;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::{ComfyUIApi, ComfyUIApiError, FetchedImage, SubmitResponse, UploadResponse};
use crate::client::{ComfyUIClient, ComfyUIClientError};
use crate::messages::ComfyUIMessage;
use crate::processor::forward_messages;

/// Buffered messages per session before the reader waits on the consumer.
pub const EVENT_BUFFER: usize = 256;

/// Parsed push-channel messages for one client id.
///
/// Dropping the subscription stops the underlying reader, which closes
/// the WebSocket.
pub struct EngineSubscription {
    pub events: mpsc::Receiver<ComfyUIMessage>,
    reader: Option<JoinHandle<()>>,
}

impl EngineSubscription {
    pub fn new(events: mpsc::Receiver<ComfyUIMessage>, reader: JoinHandle<()>) -> Self {
        Self {
            events,
            reader: Some(reader),
        }
    }

    /// A subscription fed by something other than a reader task.
    pub fn from_receiver(events: mpsc::Receiver<ComfyUIMessage>) -> Self {
        Self {
            events,
            reader: None,
        }
    }
}

impl Drop for EngineSubscription {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[async_trait]
pub trait RenderEngine: Send + Sync + 'static {
    /// Queue a job document for `client_id`.
    async fn submit(
        &self,
        document: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError>;

    /// History response for one prompt.
    async fn history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError>;

    async fn image_exists(&self, image: &ImageRef) -> Result<bool, ComfyUIApiError>;

    async fn fetch_image(&self, image: &ImageRef) -> Result<FetchedImage, ComfyUIApiError>;

    async fn upload_image(
        &self,
        filename: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<UploadResponse, ComfyUIApiError>;

    /// Open the push channel for `client_id`.
    async fn subscribe(&self, client_id: &str) -> Result<EngineSubscription, ComfyUIClientError>;
}

/// ComfyUI over HTTP and WebSocket.
#[derive(Debug, Clone)]
pub struct ComfyUIEngine {
    api: ComfyUIApi,
    client: ComfyUIClient,
}

impl ComfyUIEngine {
    pub fn new(api: ComfyUIApi, client: ComfyUIClient) -> Self {
        Self { api, client }
    }
}

#[async_trait]
impl RenderEngine for ComfyUIEngine {
    async fn submit(
        &self,
        document: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        self.api.submit_workflow(document, client_id).await
    }

    async fn history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        self.api.get_history(prompt_id).await
    }

    async fn image_exists(&self, image: &ImageRef) -> Result<bool, ComfyUIApiError> {
        self.api.image_exists(image).await
    }

    async fn fetch_image(&self, image: &ImageRef) -> Result<FetchedImage, ComfyUIApiError> {
        self.api.fetch_image(image).await
    }

    async fn upload_image(
        &self,
        filename: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        self.api.upload_image(filename, content_type, bytes).await
    }

    async fn subscribe(&self, client_id: &str) -> Result<EngineSubscription, ComfyUIClientError> {
        let connection = self.client.connect(client_id).await?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let reader = tokio::spawn(forward_messages(
            connection.ws_stream,
            connection.client_id,
            tx,
        ));
        Ok(EngineSubscription::new(rx, reader))
    }
}
