//! Integration tests for the HTTP facade.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`
//! against the real lifecycle actor and a `FakeSessionClient`.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use wagate_core::{ClientEvent, Phase};
use wagated::client::{test_identity, ClientError, FakeSessionClient, SessionClient};
use wagated::config::Config;
use wagated::lifecycle::{spawn_lifecycle, LifecycleHandle};
use wagated::sender::GatedSender;
use wagated::server::{router, AppState};

// ============================================================================
// Test Helpers
// ============================================================================

struct TestApp {
    app: Router,
    client: FakeSessionClient,
    handle: LifecycleHandle,
    _dir: TempDir,
}

fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.auth.dir = dir.path().join("auth");

    let (client, events) = FakeSessionClient::new();
    let shared: Arc<dyn SessionClient> = Arc::new(client.clone());
    let handle = spawn_lifecycle(&config, Arc::clone(&shared), events);
    let sender = GatedSender::new(shared, handle.clone());
    let app = router(AppState::new(handle.clone(), sender, config.environment));

    TestApp {
        app,
        client,
        handle,
        _dir: dir,
    }
}

async fn make_ready(t: &TestApp) {
    t.handle.request_initialize().await.unwrap();
    t.client.emit(ClientEvent::Ready(test_identity())).await;
    let mut rx = t.handle.watch_state();
    rx.wait_for(|s| s.phase == Phase::Ready).await.unwrap();
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

// ============================================================================
// Read-only routes
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_banner_at_root_and_api() {
    let t = test_app();

    for uri in ["/", "/api"] {
        let (status, body) = send(&t.app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(body, b"WhatsApp Bot API is running");
    }
}

#[tokio::test(start_paused = true)]
async fn test_health_during_startup() {
    let t = test_app();

    let (status, body) = send_json(&t.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert_eq!(body["environment"], "development");
    assert_eq!(body["whatsapp"]["status"], "Initializing");
    assert_eq!(body["whatsapp"]["isFullyReady"], false);
    assert_eq!(body["whatsapp"]["needsAuthentication"], false);
    assert_eq!(body["whatsapp"]["connectedAt"], Value::Null);
    assert_eq!(body["initializationStatus"]["maxRetries"], 5);
}

#[tokio::test(start_paused = true)]
async fn test_health_flags_missing_login_after_grace() {
    let t = test_app();
    tokio::time::advance(Duration::from_secs(61)).await;

    let (_, body) = send_json(&t.app, "GET", "/api/health", None).await;
    assert_eq!(body["whatsapp"]["status"], "Not authenticated");
    assert_eq!(body["whatsapp"]["needsAuthentication"], true);
}

#[tokio::test(start_paused = true)]
async fn test_health_and_status_when_ready() {
    let t = test_app();
    make_ready(&t).await;

    let (_, health) = send_json(&t.app, "GET", "/health", None).await;
    assert_eq!(health["whatsapp"]["status"], "Connected");
    assert_eq!(health["whatsapp"]["isAuthenticated"], true);
    assert!(health["whatsapp"]["connectedAt"].is_string());

    let (status, body) = send_json(&t.app, "GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Connected");
    assert_eq!(body["details"]["clientInfo"], true);
    assert_eq!(body["details"]["authenticated"], true);
}

#[tokio::test(start_paused = true)]
async fn test_status_reports_lost_transport() {
    let t = test_app();
    make_ready(&t).await;
    t.client.set_transport(false);

    let (_, body) = send_json(&t.app, "GET", "/status", None).await;
    assert_eq!(body["status"], "Not connected");
}

#[tokio::test(start_paused = true)]
async fn test_qr_route() {
    let t = test_app();

    let (status, _) = send(&t.app, "GET", "/qr", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    t.client
        .emit_on_connect(vec![ClientEvent::QrChallenge("2@abc,def".into())]);
    t.handle.request_initialize().await.unwrap();

    let mut found = None;
    for _ in 0..1_000 {
        let (status, body) = send(&t.app, "GET", "/api/qr", None).await;
        if status == StatusCode::OK {
            found = Some(body);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(found.as_deref(), Some(b"2@abc,def".as_slice()));

    let (_, health) = send_json(&t.app, "GET", "/health", None).await;
    assert_eq!(health["qrCodeAvailable"], true);
}

// ============================================================================
// Send message
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_send_requires_both_fields() {
    let t = test_app();

    let (status, body) =
        send_json(&t.app, "POST", "/send-message", Some(json!({"number": "1555"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = send_json(
        &t.app,
        "POST",
        "/send-message",
        Some(json!({"number": "", "message": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&t.app, "POST", "/send-message", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn test_send_while_not_ready_is_503() {
    let t = test_app();

    let (status, body) = send_json(
        &t.app,
        "POST",
        "/send-message",
        Some(json!({"number": "15551234567", "message": "hi"})),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert_eq!(body["details"]["clientInfo"], false);
    assert_eq!(body["details"]["browserReady"], false);
    assert_eq!(body["initializationStatus"]["currentRetry"], 0);
    assert_eq!(t.client.send_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_send_when_ready() {
    let t = test_app();
    make_ready(&t).await;

    let (status, body) = send_json(
        &t.app,
        "POST",
        "/api/send-message",
        Some(json!({"number": "15551234567", "message": "hi"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Message sent successfully");
    assert!(body["messageId"].is_string());
    assert_eq!(t.client.send_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_is_500() {
    let t = test_app();
    make_ready(&t).await;
    t.client
        .set_send_result(Err(ClientError::Send("chat not found".into())));

    let (status, body) = send_json(
        &t.app,
        "POST",
        "/send-message",
        Some(json!({"number": "15551234567", "message": "hi"})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Failed to send message");
    assert_eq!(body["error"], "chat not found");
}

// ============================================================================
// Force reconnect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_force_reconnect() {
    let t = test_app();
    make_ready(&t).await;

    let (status, body) = send_json(&t.app, "POST", "/force-reconnect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(
        body["message"],
        "Reconnection process started. Check logs for QR code."
    );
    assert_eq!(t.handle.phase(), Phase::Disconnected);
    assert!(t.client.teardown_count() >= 1);
}
