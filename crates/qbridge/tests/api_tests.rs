//! API integration tests.
#![cfg(unix)]

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use qbridge::chat::ChatMode;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

mod common;
use common::{ECHO_WORKER, ONESHOT_WORKER, test_app};

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
    let mut request = Request::builder().uri(uri).method(method);
    let body = match body {
        Some(value) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    app.clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

async fn json_body(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn assert_error(body: &Value, code: &str) {
    assert_eq!(body["code"], code, "unexpected body {body}");
    assert!(body["error"].is_string());
    assert!(
        body["suggestions"]
            .as_array()
            .is_some_and(|s| !s.is_empty()),
        "missing suggestions in {body}"
    );
}

#[tokio::test]
async fn test_index_and_health() {
    let tmp = TempDir::new().unwrap();
    let (app, _) = test_app(&tmp, ChatMode::Oneshot, ONESHOT_WORKER);

    let response = send(&app, Method::GET, "/", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["service"], "qbridge");
    assert_eq!(json["mode"], "oneshot");

    let response = send(&app, Method::GET, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert!(json["status"] == "healthy" || json["status"] == "degraded");
    assert_eq!(json["active_sessions"], 0);
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_session_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let (app, _) = test_app(&tmp, ChatMode::Oneshot, ONESHOT_WORKER);

    let response = send(&app, Method::POST, "/api/v1/sessions", None).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    let id = created["session_id"].as_str().unwrap().to_string();
    assert!(Uuid::parse_str(&id).is_ok());
    assert!(tmp.path().join(&id).is_dir());

    let response = send(&app, Method::GET, &format!("/api/v1/sessions/{id}"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let info = json_body(response).await;
    assert_eq!(info["message_count"], 0);

    let response = send(&app, Method::GET, "/api/v1/sessions", None).await;
    let list = json_body(response).await;
    assert_eq!(list.as_array().map(Vec::len), Some(1));

    std::fs::write(tmp.path().join(&id).join("notes.txt"), "notes").unwrap();
    let response = send(
        &app,
        Method::GET,
        &format!("/api/v1/sessions/{id}/files"),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let files = json_body(response).await;
    assert_eq!(files["file_count"], 1);
    assert_eq!(files["files"][0]["name"], "notes.txt");
    assert_eq!(files["files"][0]["mime_type"], "text/plain");

    let response = send(&app, Method::DELETE, &format!("/api/v1/sessions/{id}"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!tmp.path().join(&id).exists());

    let response = send(&app, Method::DELETE, &format!("/api/v1/sessions/{id}"), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_error(&json_body(response).await, "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_unknown_and_malformed_session_ids() {
    let tmp = TempDir::new().unwrap();
    let (app, _) = test_app(&tmp, ChatMode::Oneshot, ONESHOT_WORKER);

    let unknown = Uuid::new_v4();
    let response = send(&app, Method::GET, &format!("/api/v1/sessions/{unknown}"), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_error(&json_body(response).await, "SESSION_NOT_FOUND");

    let response = send(&app, Method::GET, "/api/v1/sessions/not-a-uuid", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_error(&json_body(response).await, "VALIDATION_ERROR");

    let response = send(
        &app,
        Method::POST,
        "/api/v1/chat",
        Some(json!({ "session_id": unknown.to_string(), "message": "hi" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_error(&json_body(response).await, "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_chat_rejects_bad_input() {
    let tmp = TempDir::new().unwrap();
    let (app, service) = test_app(&tmp, ChatMode::Oneshot, ONESHOT_WORKER);

    let response = send(
        &app,
        Method::POST,
        "/api/v1/chat",
        Some(json!({ "message": "x".repeat(4001) })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_error(&body, "VALIDATION_ERROR");
    assert_eq!(body["details"], "field: message");

    let response = send(
        &app,
        Method::POST,
        "/api/v1/chat",
        Some(json!({ "message": "<script>alert(1)</script>" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/chat")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_error(&json_body(response).await, "VALIDATION_ERROR");

    assert!(service.list_sessions().is_empty());
}

#[tokio::test]
async fn test_oneshot_chat_replays_history() {
    let tmp = TempDir::new().unwrap();
    let (app, _) = test_app(&tmp, ChatMode::Oneshot, ONESHOT_WORKER);

    let response = send(
        &app,
        Method::POST,
        "/api/v1/chat",
        Some(json!({ "message": "my name is Ada" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let first = json_body(response).await;
    assert_eq!(first["message"], "Answer: my name is Ada");
    let id = first["session_id"].as_str().unwrap().to_string();

    let response = send(
        &app,
        Method::POST,
        "/api/v1/chat",
        Some(json!({ "session_id": id.clone(), "message": "what is my name?" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let second = json_body(response).await;
    let answer = second["message"].as_str().unwrap();
    assert!(answer.starts_with("Answer: Previous conversation history:"), "{answer}");
    assert!(answer.contains("User: my name is Ada"), "{answer}");
    assert!(answer.contains("Assistant: Answer: my name is Ada"), "{answer}");
    assert!(answer.ends_with("Now, please answer my question: what is my name?"));

    let response = send(&app, Method::GET, &format!("/api/v1/sessions/{id}"), None).await;
    assert_eq!(json_body(response).await["message_count"], 4);
}

#[tokio::test]
async fn test_stream_event_framing() {
    let tmp = TempDir::new().unwrap();
    let (app, _) = test_app(&tmp, ChatMode::Persistent, ECHO_WORKER);

    let response = send(
        &app,
        Method::POST,
        "/api/v1/chat/stream",
        Some(json!({ "message": "hello there" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let body = String::from_utf8(body_bytes(response).await).unwrap();
    let events: Vec<Value> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    assert!(events.len() >= 3, "too few events: {body}");
    assert_eq!(events[0]["type"], "session");
    assert!(events[0]["session_id"].is_string());
    assert_eq!(events[events.len() - 1]["type"], "done");

    let chunks: Vec<&str> = events[1..events.len() - 1]
        .iter()
        .map(|e| {
            assert_eq!(e["type"], "chunk");
            e["content"].as_str().unwrap()
        })
        .collect();
    let text = chunks.join("\n");
    assert!(text.contains("You said: hello there"), "{text}");
    assert!(!text.contains("> hello there"), "echo leaked: {text}");
}

#[tokio::test]
async fn test_stream_request_errors_are_json() {
    let tmp = TempDir::new().unwrap();
    let (app, _) = test_app(&tmp, ChatMode::Persistent, ECHO_WORKER);

    let response = send(
        &app,
        Method::POST,
        "/api/v1/chat/stream",
        Some(json!({ "message": "   " })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_error(&json_body(response).await, "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unknown_route() {
    let tmp = TempDir::new().unwrap();
    let (app, _) = test_app(&tmp, ChatMode::Oneshot, ONESHOT_WORKER);

    let response = send(&app, Method::GET, "/api/v2/nothing", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_error(&json_body(response).await, "NOT_FOUND");
}
