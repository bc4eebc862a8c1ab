use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use splitlab_api::{create_router, AppState};
use splitlab_sandbox::testing::FakeProvider;
use splitlab_sandbox::{SandboxManager, SandboxSettings};
use splitlab_sessions::{ProgressBus, SessionOrchestrator, SessionRegistry, SessionSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower::ServiceExt;

const REPO_URL: &str = "https://github.com/acme/landing.git";

async fn dev_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            });
        }
    });
    port
}

fn app(port_floor: u16) -> (Arc<FakeProvider>, Router) {
    let fake = Arc::new(FakeProvider::new().with_clone_fixture([
        (
            "package.json",
            r#"{"scripts":{"dev":"next dev"},"dependencies":{"next":"14.0.0","react":"18.2.0"}}"#,
        ),
        (
            "src/app/layout.tsx",
            "export default function RootLayout({ children }) {\n  return (\n    <html lang=\"en\">\n      <body>{children}</body>\n    </html>\n  );\n}\n",
        ),
    ]));
    let sandbox = Arc::new(SandboxManager::new(fake.clone(), SandboxSettings::default()));
    let settings = SessionSettings {
        port_floor,
        readiness_attempts: 2,
        readiness_interval: Duration::from_millis(20),
        ..SessionSettings::default()
    };
    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::new(SessionRegistry::new()),
        sandbox,
        Arc::new(ProgressBus::new()),
        settings,
    ));
    (fake, create_router(AppState::new(orchestrator)))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_check() {
    let (_fake, app) = app(4100);
    let (status, body) = get_json(&app, "/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn test_picker_script_is_javascript() {
    let (_fake, app) = app(4100);
    let request = Request::builder()
        .uri("/api/picker/script")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("application/javascript"));
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(!body.is_empty());
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let (_fake, app) = app(4100);

    let (status, body) = get_json(&app, "/api/sessions/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Session not found: missing");

    let (status, _) = get_json(&app, "/api/sessions/missing/picker").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/sessions/missing")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get_json(&app, "/api/progress/setup-missing/stream").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_session_rejects_empty_url() {
    let (fake, app) = app(4100);
    let (status, body) = post_json(&app, "/api/sessions", json!({ "repoUrl": "" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(fake.container_names().is_empty());
}

#[tokio::test]
async fn test_session_lifecycle_over_http() {
    let port = dev_server().await;
    let (fake, app) = app(port);

    let (status, created) =
        post_json(&app, "/api/sessions", json!({ "repoUrl": REPO_URL })).await;
    assert_eq!(status, StatusCode::OK, "{}", created);
    assert_eq!(created["success"], true);
    assert_eq!(created["previewUrl"], format!("http://localhost:{}", port));
    let session_id = created["sessionId"].as_str().unwrap().to_string();

    let (status, session) = get_json(&app, &format!("/api/sessions/{}", session_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["data"]["buildStatus"], "running");
    assert_eq!(session["data"]["previewReady"], true);
    assert_eq!(session["data"]["framework"], "Next.js");
    assert_eq!(session["data"]["repoName"], "landing");
    assert_eq!(session["data"]["previewPort"], port);

    let (_, listed) = get_json(&app, "/api/sessions").await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let (status, picker) =
        get_json(&app, &format!("/api/sessions/{}/picker", session_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(picker["data"]["injected"], true);

    let (status, file) = get_json(
        &app,
        &format!("/api/sessions/{}/file?path=package.json", session_id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(file["data"]["content"].as_str().unwrap().contains("next"));

    let (status, missing) = get_json(
        &app,
        &format!("/api/sessions/{}/file?path=nope.txt", session_id),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{}", missing);

    let request = Request::builder()
        .uri(format!("/api/progress/setup-{}/stream", session_id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    let lines: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(lines.len() > 3);
    assert_eq!(lines.last().unwrap()["message"], "Completed successfully");
    assert_eq!(lines.last().unwrap()["type"], "success");

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/sessions/{}", session_id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(fake.container_names().is_empty());

    let (status, _) = get_json(&app, &format!("/api/sessions/{}", session_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cleanup_stale_accepts_empty_body() {
    let port = dev_server().await;
    let (fake, app) = app(port);
    let (_, created) = post_json(&app, "/api/sessions", json!({ "repoUrl": REPO_URL })).await;
    assert_eq!(created["success"], true, "{}", created);

    let request = Request::builder()
        .method("POST")
        .uri("/api/sessions/cleanup-stale")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 0);

    let (status, body) = post_json(
        &app,
        "/api/sessions/cleanup-stale",
        json!({ "maxInactivityMinutes": 0 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 1);
    assert!(fake.container_names().is_empty());
}
