// SPDX-License-Identifier: PMPL-1.0-or-later
//! Webhook delivery and deduplication, end to end.
//!
//! An axum server on 127.0.0.1:0 records every request it receives. The
//! webhook store runs on a cache engine driven by a `ManualClock`, so dedup
//! windows expire exactly when the test says so.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, Method};
use axum::routing::any;
use axum::Router;
use serde_json::json;

use gateway_storage::distributed::embedded_engine_builder;
use gateway_storage::{ManualClock, MemoryEngine, StorageConfig, StorageContext, StorageFactory};
use gateway_webhooks::{EventMessage, HookOutcome, WebhookHandler, USER_AGENT};

#[derive(Debug, Clone)]
struct Received {
    method: Method,
    user_agent: Option<String>,
    token: Option<String>,
    body: String,
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Received>>,
}

impl Recorder {
    fn hits(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn last(&self) -> Received {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }
}

async fn hook(
    State(recorder): State<Arc<Recorder>>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> &'static str {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    recorder.seen.lock().unwrap().push(Received {
        method,
        user_agent: header("user-agent"),
        token: header("x-token"),
        body,
    });
    "ok"
}

async fn spawn_endpoint() -> (SocketAddr, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let app = Router::new()
        .route("/hook", any(hook))
        .with_state(Arc::clone(&recorder));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, recorder)
}

fn factory_with_clock(clock: &ManualClock) -> StorageFactory {
    let engine = Arc::new(MemoryEngine::with_clock(Arc::new(clock.clone())));
    let context = StorageContext::with_parts(StorageConfig::default(), embedded_engine_builder(), engine);
    StorageFactory::new(Arc::new(context))
}

/// A template that renders the event's meta object as the whole body.
fn meta_template(dir: &tempfile::TempDir) -> String {
    let path = dir.path().join("meta.json");
    std::fs::write(&path, "{{ .meta }}").unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_identical_event_is_suppressed_until_window_expires() {
    let (addr, recorder) = spawn_endpoint().await;
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let handler = WebhookHandler::new(
        json!({
            "method": "POST",
            "target_path": format!("http://{addr}/hook"),
            "template_path": meta_template(&dir),
            "event_timeout": 5
        }),
        factory_with_clock(&clock),
    )
    .unwrap();
    let event = EventMessage::new("QuotaExceeded", json!({"id": 1}));

    assert_eq!(handler.handle_event(&event).await, HookOutcome::Delivered(200));
    assert_eq!(recorder.hits(), 1);
    assert_eq!(recorder.last().body, r#"{"id":1}"#);

    assert_eq!(handler.handle_event(&event).await, HookOutcome::Suppressed);
    assert_eq!(recorder.hits(), 1);

    clock.advance(Duration::from_secs(4));
    assert_eq!(handler.handle_event(&event).await, HookOutcome::Suppressed);

    clock.advance(Duration::from_secs(1));
    assert_eq!(handler.handle_event(&event).await, HookOutcome::Delivered(200));
    assert_eq!(recorder.hits(), 2);
}

#[tokio::test]
async fn test_distinct_events_are_not_deduplicated() {
    let (addr, recorder) = spawn_endpoint().await;
    let dir = tempfile::tempdir().unwrap();
    let handler = WebhookHandler::new(
        json!({
            "method": "POST",
            "target_path": format!("http://{addr}/hook"),
            "template_path": meta_template(&dir),
            "event_timeout": 60
        }),
        factory_with_clock(&ManualClock::new()),
    )
    .unwrap();

    for id in 0..3 {
        let event = EventMessage::new("KeyExpired", json!({"id": id}));
        assert_eq!(handler.handle_event(&event).await, HookOutcome::Delivered(200));
    }
    assert_eq!(recorder.hits(), 3);
}

#[tokio::test]
async fn test_handlers_share_one_store() {
    let (addr, recorder) = spawn_endpoint().await;
    let dir = tempfile::tempdir().unwrap();
    let factory = factory_with_clock(&ManualClock::new());
    let conf = json!({
        "method": "POST",
        "target_path": format!("http://{addr}/hook"),
        "template_path": meta_template(&dir),
        "event_timeout": 60
    });
    let first = WebhookHandler::new(conf.clone(), factory.clone()).unwrap();
    let second = WebhookHandler::new(conf, factory.clone()).unwrap();
    let event = EventMessage::new("KeyExpired", json!({"id": 7}));

    assert_eq!(first.handle_event(&event).await, HookOutcome::Delivered(200));
    assert_eq!(second.handle_event(&event).await, HookOutcome::Suppressed);
    assert_eq!(recorder.hits(), 1);
    assert!(Arc::ptr_eq(
        &factory.webhook_store().await.unwrap(),
        &factory.webhook_store().await.unwrap()
    ));
}

#[tokio::test]
async fn test_failed_delivery_still_writes_ticket() {
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let handler = WebhookHandler::new(
        json!({"method": "POST", "target_path": format!("http://{addr}/hook"), "event_timeout": 30}),
        factory_with_clock(&ManualClock::new()),
    )
    .unwrap();
    let event = EventMessage::new("BreakerTripped", json!({"message": "down"}));

    assert_eq!(handler.handle_event(&event).await, HookOutcome::DeliveryFailed);
    assert_eq!(handler.handle_event(&event).await, HookOutcome::Suppressed);
}

#[tokio::test]
async fn test_request_shape_on_the_wire() {
    let (addr, recorder) = spawn_endpoint().await;
    let handler = WebhookHandler::new(
        json!({
            "method": "patch",
            "target_path": format!("http://{addr}/hook"),
            "template_path": "/nonexistent/template.json",
            "header_map": {"X-Token": "abc"},
            "event_timeout": 5
        }),
        factory_with_clock(&ManualClock::new()),
    )
    .unwrap();
    let event = EventMessage::new(
        "AuthFailure",
        json!({"message": "bad key", "path": "/api", "origin": "10.0.0.1", "key": "k1"}),
    );

    assert_eq!(handler.handle_event(&event).await, HookOutcome::Delivered(200));
    let received = recorder.last();
    assert_eq!(received.method, Method::PATCH);
    assert_eq!(received.user_agent.as_deref(), Some(USER_AGENT));
    assert_eq!(received.token.as_deref(), Some("abc"));

    // The missing template file fell back to the built-in one.
    let body: serde_json::Value = serde_json::from_str(&received.body).unwrap();
    assert_eq!(body["event"], "AuthFailure");
    assert_eq!(body["origin"], "10.0.0.1");
}
