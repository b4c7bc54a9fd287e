//! Integration tests for the HTTP surface, driven through the full router.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{body_bytes, body_json, three_node_workflow, Part, TestApp};
use relay_api::engine::BridgeState;
use relay_core::session::SessionStatus;
use relay_core::types::SessionId;
use serde_json::json;

// ---------------------------------------------------------------------------
// Health and general behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_counters() {
    let app = TestApp::new().await;
    app.state.sessions.create().await;

    let response = app.get("/api/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["activeSessions"], 1);
    assert_eq!(json["bridgedSessions"], 0);
    assert_eq!(json["clientConnections"], 0);
}

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let app = TestApp::new().await;
    let response = app.get("/api/health").await;

    let request_id = response.headers().get("x-request-id");
    assert!(request_id.is_some(), "Response must contain an x-request-id header");
    assert_eq!(request_id.unwrap().to_str().unwrap().len(), 36);
}

#[tokio::test]
async fn cors_preflight_allows_configured_origin() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/execute")
        .header("Origin", "http://localhost:5173")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "content-type")
        .body(Body::empty())
        .unwrap();

    let response = app.request(request).await;

    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:5173"
    );
}

#[tokio::test]
async fn unknown_paths_serve_static_index() {
    let app = TestApp::new().await;
    let response = app.get("/some/client/route").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"<html>relay</html>");
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn workflow_upload_list_get_delete() {
    let app = TestApp::new().await;
    let document = three_node_workflow().to_string();

    let response = app
        .post_multipart(
            "/api/upload-workflow",
            &[
                Part::file("workflow", "portrait.json", "application/json", document.as_bytes()),
                Part::text("name", "Portrait"),
                Part::text("description", "Face restyle"),
            ],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["workflow"]["name"], "Portrait");
    assert_eq!(json["workflow"]["nodeCount"], 3);
    let id = json["workflow"]["id"].as_str().unwrap().to_string();

    let json = body_json(app.get("/api/workflows").await).await;
    assert_eq!(json["workflows"].as_array().unwrap().len(), 1);
    assert_eq!(json["workflows"][0]["description"], "Face restyle");

    let json = body_json(app.get(&format!("/api/workflows/{id}")).await).await;
    assert_eq!(json["workflow"]["id"], id.as_str());
    assert_eq!(json["workflow"]["data"]["2"]["class_type"], "KSampler");

    let response = app.delete(&format!("/api/workflows/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.get(&format!("/api/workflows/{id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn workflow_upload_rejects_invalid_json() {
    let app = TestApp::new().await;

    let response = app
        .post_multipart(
            "/api/upload-workflow",
            &[Part::file("workflow", "broken.json", "application/json", b"{ not json")],
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn workflow_upload_rejects_empty_document() {
    let app = TestApp::new().await;

    let response = app
        .post_multipart(
            "/api/upload-workflow",
            &[Part::file("workflow", "empty.json", "application/json", b"{}")],
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn workflow_upload_requires_file() {
    let app = TestApp::new().await;

    let response = app
        .post_multipart("/api/upload-workflow", &[Part::text("name", "Nothing")])
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Image upload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn image_upload_creates_session() {
    let app = TestApp::new().await;

    let response = app
        .post_multipart(
            "/api/upload-image",
            &[Part::file("image", "face.png", "image/png", b"\x89PNG")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let session_id: SessionId = json["sessionId"].as_str().unwrap().parse().unwrap();
    let image_url = json["imageUrl"].as_str().unwrap();
    assert!(image_url.starts_with("/api/images/"));
    assert!(image_url.ends_with("-face.png?type=input&subfolder="));

    let uploads = app.engine.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].ends_with("-face.png"));

    let session = app.state.sessions.get(session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::ImageUploaded);
    assert_eq!(session.uploaded_image.unwrap().original_filename, "face.png");
}

#[tokio::test]
async fn image_upload_reuses_known_session() {
    let app = TestApp::new().await;
    let session = app.state.sessions.create().await;
    let raw_id = session.id.to_string();

    let response = app
        .post_multipart(
            "/api/upload-image",
            &[
                Part::text("sessionId", &raw_id),
                Part::file("image", "face.png", "image/png", b"\x89PNG"),
            ],
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["sessionId"], raw_id.as_str());
    assert_eq!(app.state.sessions.len().await, 1);
}

#[tokio::test]
async fn image_upload_rejects_unknown_session() {
    let app = TestApp::new().await;
    let unknown = SessionId::new().to_string();

    let response = app
        .post_multipart(
            "/api/upload-image",
            &[
                Part::text("sessionId", &unknown),
                Part::file("image", "face.png", "image/png", b"\x89PNG"),
            ],
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.engine.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn image_upload_rejects_non_images() {
    let app = TestApp::new().await;

    let response = app
        .post_multipart(
            "/api/upload-image",
            &[Part::file("image", "notes.txt", "text/plain", b"hello")],
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn image_upload_engine_failure_leaves_no_session() {
    let app = TestApp::new().await;
    *app.engine.upload_failure.lock().unwrap() = Some(500);

    let response = app
        .post_multipart(
            "/api/upload-image",
            &[Part::file("image", "face.png", "image/png", b"\x89PNG")],
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(app.state.sessions.is_empty().await);
}

// ---------------------------------------------------------------------------
// Execute
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execute_queues_workflow_and_opens_bridge() {
    let app = TestApp::new().await;
    let workflow_id = app.store_workflow(three_node_workflow()).await;

    let response = app
        .post_json("/api/execute", json!({ "workflowId": workflow_id }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["promptId"], "prompt-1");
    assert_eq!(json["message"], "Workflow execution started");
    assert_eq!(json["totalNodes"], 3);
    let session_id: SessionId = json["sessionId"].as_str().unwrap().parse().unwrap();
    assert_eq!(
        json["wsEndpoint"],
        format!("/ws?clientId=engine-{session_id}").as_str()
    );

    let session = app.state.sessions.get(session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Processing);
    assert_eq!(session.engine_job_id.as_deref(), Some("prompt-1"));
    assert_eq!(session.progress_percent, 0);
    assert!(session.started_at.is_some());

    assert_eq!(
        app.state.bridges.state(session_id).await,
        Some(BridgeState::Connected)
    );

    let submitted = app.engine.submitted.lock().unwrap().clone();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].1, session.client_id);
    // Without an uploaded image the document goes out unchanged.
    assert_eq!(submitted[0].0, three_node_workflow());
}

#[tokio::test]
async fn execute_with_uploaded_image_mutates_document() {
    let app = TestApp::new().await;
    let workflow_id = app.store_workflow(three_node_workflow()).await;

    let upload = app
        .post_multipart(
            "/api/upload-image",
            &[Part::file("image", "face.png", "image/png", b"\x89PNG")],
        )
        .await;
    let session_id = body_json(upload).await["sessionId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .post_json(
            "/api/execute",
            json!({
                "workflowId": workflow_id,
                "sessionId": session_id,
                "userInputs": { "2": { "steps": 30 }, "99": { "ignored": true } }
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["sessionId"], session_id.as_str());

    let submitted = app.engine.submitted.lock().unwrap()[0].0.clone();
    let loader = &submitted["1"];
    assert_eq!(loader["class_type"], "LoadImage");
    assert_eq!(loader["_meta"]["title"], "Source");
    assert!(loader["inputs"]["image"]
        .as_str()
        .unwrap()
        .ends_with("-face.png"));
    assert_eq!(loader["inputs"]["upload"], loader["inputs"]["image"]);

    let sampler = &submitted["2"];
    assert_eq!(sampler["inputs"]["steps"], 30);
    let seed = sampler["inputs"]["seed"].as_u64().unwrap();
    assert!(seed < 4_294_967_295);
    assert!(submitted.get("99").is_none());
}

#[tokio::test]
async fn execute_unknown_workflow_is_bad_request() {
    let app = TestApp::new().await;

    let response = app
        .post_json("/api/execute", json!({ "workflowId": "missing" }))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.state.sessions.is_empty().await);
}

#[tokio::test]
async fn execute_submit_failure_marks_session_failed() {
    let app = TestApp::new().await;
    let workflow_id = app.store_workflow(three_node_workflow()).await;
    *app.engine.submit_failure.lock().unwrap() = Some(400);

    let session = app.state.sessions.create().await;
    let response = app
        .post_json(
            "/api/execute",
            json!({ "workflowId": workflow_id, "sessionId": session.id.to_string() }),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["code"], "UPSTREAM_ERROR");

    let session = app.state.sessions.get(session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.engine_job_id.is_none());
    assert_eq!(app.state.bridges.state(session.id).await, None);
}

// ---------------------------------------------------------------------------
// Status and close
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_returns_snapshot() {
    let app = TestApp::new().await;
    let workflow_id = app.store_workflow(three_node_workflow()).await;
    let json = body_json(
        app.post_json("/api/execute", json!({ "workflowId": workflow_id }))
            .await,
    )
    .await;
    let session_id = json["sessionId"].as_str().unwrap();

    let response = app.get(&format!("/api/status/{session_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["sessionId"], session_id);
    assert_eq!(json["status"], "processing");
    assert_eq!(json["progress"], 0);
    assert_eq!(json["message"], "Workflow queued");
    assert_eq!(json["totalNodes"], 3);
    assert_eq!(json["executedNodesCount"], 0);
    assert!(json["startTime"].is_string());
    assert!(json["endTime"].is_null());
}

#[tokio::test]
async fn status_of_unknown_session_is_404() {
    let app = TestApp::new().await;

    let response = app
        .get(&format!("/api/status/{}", SessionId::new()))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/api/status/not-a-session").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn close_session_removes_session_and_bridge() {
    let app = TestApp::new().await;
    let workflow_id = app.store_workflow(three_node_workflow()).await;
    let json = body_json(
        app.post_json("/api/execute", json!({ "workflowId": workflow_id }))
            .await,
    )
    .await;
    let session_id: SessionId = json["sessionId"].as_str().unwrap().parse().unwrap();

    let response = app.delete(&format!("/api/sessions/{session_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!app.state.sessions.contains(session_id).await);
    assert_eq!(app.state.bridges.state(session_id).await, None);

    let response = app.delete(&format!("/api/sessions/{session_id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Image proxy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn image_proxy_streams_engine_bytes() {
    let app = TestApp::new().await;
    app.engine
        .serve_image("out.png", "run", "image/png", b"png-bytes");

    let response = app
        .get("/api/images/out.png?type=output&subfolder=run")
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/png");
    assert_eq!(body_bytes(response).await, b"png-bytes");
}

#[tokio::test]
async fn image_proxy_retries_output_without_subfolder() {
    let app = TestApp::new().await;
    app.engine.serve_image("out.png", "", "image/png", b"root-bytes");

    let response = app
        .get("/api/images/out.png?type=output&subfolder=missing")
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"root-bytes");
    assert_eq!(app.engine.fetches.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn image_proxy_does_not_retry_input_images() {
    let app = TestApp::new().await;
    app.engine.serve_image("in.png", "", "image/png", b"root-bytes");

    let response = app
        .get("/api/images/in.png?type=input&subfolder=missing")
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(app.engine.fetches.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn image_proxy_rejects_unknown_type() {
    let app = TestApp::new().await;

    let response = app.get("/api/images/out.png?type=secret").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.engine.fetches.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Browser push channel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ws_without_client_id_is_bad_request() {
    let app = TestApp::new().await;

    let response = app.get("/ws").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");

    let response = app.get("/ws?clientId=%20").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
