//! Integration tests for mdsync-server API endpoints
//!
//! Drives the router with `oneshot` against a scripted remote client.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use mdsync_common::config::ServiceConfig;
use mdsync_common::events::ProgressUpdate;
use mdsync_server::reconcile::{match_search_results, CatalogRecord, ImportEntry};
use mdsync_server::services::{
    ClientFactory, Credentials, JobQueue, QueueTracker, QueuedJob, RemoteClient, RemoteError,
    SearchOutcome, SessionManager,
};
use mdsync_server::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

const BOUNDARY: &str = "mdsync-test-boundary";

/// Remote client over fixed data; `authenticate` waits for a gate permit
struct ScriptedClient {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl RemoteClient for ScriptedClient {
    async fn authenticate(&self, _: &Credentials) -> Result<(), RemoteError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| RemoteError::Auth("gate closed".into()))?;
        Ok(())
    }

    async fn fetch_all_followed(&self) -> Result<Vec<CatalogRecord>, RemoteError> {
        Ok(vec![
            CatalogRecord::new("A").with_title("en", "Attack on Titan"),
            CatalogRecord::new("B").with_title("en", "Vinland Saga"),
        ])
    }

    async fn search_and_follow(
        &self,
        entries: &[ImportEntry],
        _follow: bool,
    ) -> Result<SearchOutcome, RemoteError> {
        let catalog = vec![CatalogRecord::new("C").with_title("en", "Berserk")];
        let mut outcome = SearchOutcome::default();
        for entry in entries {
            match match_search_results(entry, &catalog) {
                Some((record, info)) => outcome.new_matches.push((record.id.clone(), info)),
                None => outcome.still_unmatched.push(entry.clone()),
            }
        }
        Ok(outcome)
    }
}

fn scripted_factory(gate: Arc<Semaphore>) -> ClientFactory {
    Arc::new(move || {
        Arc::new(ScriptedClient { gate: gate.clone() }) as Arc<dyn RemoteClient>
    })
}

/// Test helper: state without a worker, so queued jobs stay queued
fn idle_state(capacity: usize) -> (AppState, mpsc::Receiver<QueuedJob>) {
    let mut config = ServiceConfig::default();
    config.queue.capacity = capacity;
    idle_state_with(config)
}

fn idle_state_with(config: ServiceConfig) -> (AppState, mpsc::Receiver<QueuedJob>) {
    let (queue, rx) = JobQueue::new(config.queue.capacity, QueueTracker::new());
    let state = AppState {
        sessions: Arc::new(SessionManager::new(
            scripted_factory(Arc::new(Semaphore::new(0))),
            config.sessions.progress_capacity,
        )),
        queue,
        config: Arc::new(config),
        startup_time: chrono::Utc::now(),
    };
    (state, rx)
}

fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str)>) -> Body {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    if let Some((filename, content)) = file {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"manga_list\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    Body::from(body)
}

fn follow_request(user_id: &str, file: Option<(&str, &str)>) -> Request<Body> {
    let fields = [
        ("user_id", user_id),
        ("username", "reader"),
        ("password", "hunter2"),
        ("client_id", "personal-client"),
        ("client_secret", "s3cret"),
    ];
    Request::builder()
        .method("POST")
        .uri("/follow")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart_body(&fields, file))
        .unwrap()
}

const LIST: &str = "hid,title\n1,Attack on Titan\n2,Vinlnd Saga\n3,Berserk\n4,Unknown Thing\n";

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Read SSE frames until the accumulated text contains `needle`
async fn read_until(body: &mut Body, text: &mut String, needle: &str) {
    let reading = tokio::time::timeout(Duration::from_secs(5), async {
        while !text.contains(needle) {
            let frame = body.frame().await.unwrap().unwrap();
            if let Ok(data) = frame.into_data() {
                text.push_str(std::str::from_utf8(&data).unwrap());
            }
        }
    })
    .await;
    assert!(reading.is_ok(), "timed out waiting for {needle:?}, got {text:?}");
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (state, _rx) = idle_state(4);
    let app = mdsync_server::build_router(state);

    let (status, json) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "mdsync-server");
    assert_eq!(json["queued"], 0);
    assert_eq!(json["active_sessions"], 0);
}

#[tokio::test]
async fn test_follow_queues_job() {
    let (state, _rx) = idle_state(4);
    let app = mdsync_server::build_router(state.clone());

    let (status, json) = send(&app, follow_request("alice", Some(("list.csv", LIST)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "queued");
    assert_eq!(json["identity"], "alice");
    assert_eq!(json["position"], 1);

    let session_id = json["sessionID"].as_str().unwrap().to_string();
    let (status, json) = send(&app, get(&format!("/queue?session_id={session_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, serde_json::json!({ "position": 1, "queued": 1 }));

    let (_, health) = send(&app, get("/health")).await;
    assert_eq!(health["active_sessions"], 1);
}

#[tokio::test]
async fn test_follow_rejects_bad_requests() {
    let (state, _rx) = idle_state(4);
    let app = mdsync_server::build_router(state.clone());

    // No upload
    let (status, json) = send(&app, follow_request("alice", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");

    // Unsupported extension
    let (status, _) = send(&app, follow_request("alice", Some(("list.json", "{}")))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Missing identity
    let (status, _) = send(&app, follow_request("", Some(("list.csv", LIST)))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(state.sessions.is_empty().await);
    assert_eq!(state.tracker().size(), 0);
}

#[tokio::test]
async fn test_follow_when_queue_full() {
    let (state, _rx) = idle_state(1);
    let app = mdsync_server::build_router(state.clone());

    let (status, _) = send(&app, follow_request("alice", Some(("list.csv", LIST)))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&app, follow_request("bob", Some(("list.csv", LIST)))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["error"]["code"], "QUEUE_FULL");

    // No session leaked, order unchanged
    assert_eq!(state.sessions.len().await, 1);
    assert!(state.sessions.get("bob").await.is_none());
    assert_eq!(state.tracker().size(), 1);
}

#[tokio::test]
async fn test_follow_accepts_large_upload() {
    let (state, _rx) = idle_state(4);
    let app = mdsync_server::build_router(state.clone());

    // Past axum's 2 MB default, within the configured 10 MiB
    let mut list = String::from("hid,title\n");
    let mut row = 0;
    while list.len() < 3 * 1024 * 1024 {
        list.push_str(&format!("{row},Series number {row}\n"));
        row += 1;
    }

    let upload = Some(("list.csv", list.as_str()));
    let (status, json) = send(&app, follow_request("alice", upload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "queued");
    assert_eq!(state.tracker().size(), 1);
}

#[tokio::test]
async fn test_follow_rejects_oversized_upload() {
    let mut config = ServiceConfig::default();
    config.max_upload_bytes = 1024;
    let (state, _rx) = idle_state_with(config);
    let app = mdsync_server::build_router(state.clone());

    let list = LIST.repeat(64);
    let upload = Some(("list.csv", list.as_str()));
    let (status, json) = send(&app, follow_request("alice", upload)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json["error"]["code"], "PAYLOAD_TOO_LARGE");

    assert!(state.sessions.is_empty().await);
    assert_eq!(state.tracker().size(), 0);
}

#[tokio::test]
async fn test_resubmission_replaces_queue_entry() {
    let (state, _rx) = idle_state(4);
    let app = mdsync_server::build_router(state.clone());

    let (_, first) = send(&app, follow_request("alice", Some(("list.csv", LIST)))).await;
    let (_, second) = send(&app, follow_request("alice", Some(("list.csv", LIST)))).await;

    assert_ne!(first["sessionID"], second["sessionID"]);
    assert_eq!(second["position"], 1);
    assert_eq!(state.tracker().size(), 1);
    assert_eq!(state.sessions.len().await, 1);
}

#[tokio::test]
async fn test_cancel() {
    let (state, _rx) = idle_state(4);
    let app = mdsync_server::build_router(state.clone());

    let (status, _) = send(&app, post("/cancel?user_id=nobody")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, queued) = send(&app, follow_request("alice", Some(("list.csv", LIST)))).await;
    let session_id = queued["sessionID"].as_str().unwrap().to_string();

    let (status, json) = send(&app, post("/cancel?user_id=alice")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "cancelled");
    assert_eq!(json["sessionID"], session_id.as_str());

    let (_, position) = send(&app, get(&format!("/queue?session_id={session_id}"))).await;
    assert_eq!(position, serde_json::json!({ "position": 0, "queued": 0 }));

    let (status, _) = send(&app, post(&format!("/cancel?session_id={session_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_progress_lookup_errors() {
    let (state, _rx) = idle_state(4);
    let app = mdsync_server::build_router(state.clone());

    let (status, _) = send(&app, get("/progress?user_id=nobody")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/progress")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let session = state.sessions.create("alice").await.session;
    let _listener = session.attach_listener().unwrap();
    let (status, json) = send(&app, get("/progress?user_id=alice")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_malformed_session_id() {
    let (state, _rx) = idle_state(4);
    let app = mdsync_server::build_router(state);

    for request in [
        get("/progress?session_id=not-a-uuid"),
        post("/cancel?session_id=not-a-uuid"),
        get("/queue?session_id=not-a-uuid"),
        get("/queue/subscribe?session_id=not-a-uuid"),
    ] {
        let (status, json) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("not-a-uuid"));
    }
}

#[tokio::test]
async fn test_queue_subscribe_tracks_position() {
    let (state, _rx) = idle_state(4);
    let app = mdsync_server::build_router(state.clone());

    let (_, alice) = send(&app, follow_request("alice", Some(("list.csv", LIST)))).await;
    let session_id = alice["sessionID"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(get(&format!("/queue/subscribe?session_id={session_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();
    let mut text = String::new();

    read_until(&mut body, &mut text, r#"{"position":1,"queued":1}"#).await;
    assert!(text.contains("event: queue"));

    send(&app, follow_request("bob", Some(("list.csv", LIST)))).await;
    read_until(&mut body, &mut text, r#"{"position":1,"queued":2}"#).await;

    send(&app, post("/cancel?user_id=alice")).await;
    read_until(&mut body, &mut text, r#"{"position":0,"queued":1}"#).await;
}

#[tokio::test]
async fn test_static_assets_fallback() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>mdsync</h1>").unwrap();

    let mut config = ServiceConfig::default();
    config.static_assets = Some(dir.path().to_path_buf());
    let (state, _rx) = idle_state_with(config);
    let app = mdsync_server::build_router(state);

    let response = app.clone().oneshot(get("/index.html")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"<h1>mdsync</h1>");

    // API routes still win over the fallback
    let (status, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_progress_stream_delivers_buffered_events() {
    let (state, _rx) = idle_state(4);
    let app = mdsync_server::build_router(state.clone());

    let session = state.sessions.create("alice").await.session;
    session.send_progress(ProgressUpdate::info("Reading import list..."));
    session.send_progress(ProgressUpdate::complete("Operation completed"));

    let response = app
        .clone()
        .oneshot(get(&format!("/progress?session_id={}", session.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("event: info"));
    assert!(text.contains("event: complete"));
    assert!(text.find("Reading import list").unwrap() < text.find("Operation completed").unwrap());
}

#[tokio::test]
async fn test_follow_end_to_end() {
    let gate = Arc::new(Semaphore::new(0));
    let shutdown = CancellationToken::new();
    let services = mdsync_server::start_services(
        ServiceConfig::default(),
        scripted_factory(gate.clone()),
        shutdown.clone(),
    );
    let state = services.state.clone();
    let app = mdsync_server::build_router(services.state);

    let (status, json) = send(&app, follow_request("alice", Some(("list.csv", LIST)))).await;
    assert_eq!(status, StatusCode::OK);
    let session_id = json["sessionID"].as_str().unwrap().to_string();

    // Worker is parked in authenticate until the gate opens
    let response = app
        .clone()
        .oneshot(get(&format!("/progress?session_id={session_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    gate.add_permits(1);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("event: complete"));
    assert!(text.contains("\"direct_matches\":1"));
    assert!(text.contains("\"fuzzy_matches\":1"));
    assert!(text.contains("\"new_matches\":1"));
    assert!(text.contains("\"still_unmatched\":1"));

    // Worker removes the session once the job is done
    for _ in 0..100 {
        if state.sessions.is_empty().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(state.sessions.get("alice").await.is_none());

    shutdown.cancel();
    services.worker.await.unwrap();
    services.sweeper.await.unwrap();
}
