use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sustainability_bot::auth::TokenAuthority;
use sustainability_bot::memory_db::ChatDatabase;
use sustainability_bot::model_runtime::{CompletionOptions, ScriptedRuntime, TokenUsage};
use sustainability_bot::prompt_store::PromptStore;
use sustainability_bot::shared_state::AppState;
use sustainability_bot::{build_router, ResponsePipeline};
use tempfile::TempDir;
use tower::ServiceExt;

const API_KEY: &str = "test-api-key";

struct Harness {
    app: Router,
    _dir: TempDir,
}

fn harness(runtime: ScriptedRuntime) -> Harness {
    let dir = TempDir::new().unwrap();
    let database = Arc::new(ChatDatabase::new_in_memory().unwrap());
    let pipeline = ResponsePipeline::new(
        Arc::clone(&database),
        Arc::new(runtime),
        CompletionOptions::default(),
        90.0,
        3,
    );
    let tokens = TokenAuthority::new(API_KEY, "test-secret", chrono::Duration::minutes(30)).unwrap();
    let prompts = PromptStore::new(dir.path().join("prompt.json"));
    let state = AppState::new(database, pipeline, tokens, prompts);
    Harness {
        app: build_router(state, Duration::from_secs(30)),
        _dir: dir,
    }
}

fn composting_runtime() -> ScriptedRuntime {
    ScriptedRuntime::new(
        ["Composting ", "turns food scraps ", "into soil."],
        TokenUsage { prompt_tokens: 30, completion_tokens: 12, total_tokens: 42, cost_usd: 0.002 },
    )
}

async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn token(app: &Router) -> String {
    let (status, body) = call(app, Method::POST, "/api/generate-bearer-token", None, Some(json!({ "api_key": API_KEY }))).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    body["data"]["access_token"].as_str().unwrap().to_string()
}

/// Data line of the first SSE event with the given name.
fn event_data(sse: &str, name: &str) -> Option<String> {
    sse.split("\n\n")
        .find(|block| block.lines().any(|l| l == format!("event: {}", name)))
        .and_then(|block| block.lines().find_map(|l| l.strip_prefix("data: ")))
        .map(str::to_string)
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let h = harness(composting_runtime());

    let (status, body) = call(&h.app, Method::GET, "/api/analytics", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("auth_error"));

    let (status, _) = call(&h.app, Method::GET, "/api/analytics", Some("v1.1.x.deadbeef"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&h.app, Method::POST, "/api/generate-bearer-token", None, Some(json!({ "api_key": "wrong" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&h.app, Method::GET, "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn message_round_trip_with_feedback_and_analytics() {
    let h = harness(composting_runtime());
    let token = token(&h.app).await;
    let t = Some(token.as_str());

    let message = json!({
        "user_id": "u1",
        "session_id": "s1",
        "name": "Asha",
        "age": "29",
        "gender": "female",
        "city": "Pune",
        "incoming_message": "What is composting?"
    });

    // No prompt configured yet.
    let (status, _) = call(&h.app, Method::POST, "/api/send-message", t, Some(message.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&h.app, Method::POST, "/api/update-prompt", t, Some(json!({ "prompt": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&h.app, Method::POST, "/api/update-prompt", t, Some(json!({ "prompt": "You help people live sustainably." }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, sse) = call(&h.app, Method::POST, "/api/send-message", t, Some(message)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(sse.contains("data: Composting "));
    assert!(sse.contains("data: into soil."));
    assert!(event_data(&sse, "error").is_none());

    let record: Value = serde_json::from_str(&event_data(&sse, "complete").unwrap()).unwrap();
    assert_eq!(record["total_tokens"], json!(42));
    assert!((record["cost_inr"].as_f64().unwrap() - 0.18).abs() < 1e-9);
    let message_id = record["message_id"].as_str().unwrap().to_string();

    let (status, _) = call(&h.app, Method::POST, "/api/update-feedback", t, Some(json!({ "message_id": message_id, "user_feedback": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&h.app, Method::POST, "/api/update-feedback", t, Some(json!({ "message_id": "missing", "user_feedback": 1 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&h.app, Method::POST, "/api/update-feedback", t, Some(json!({ "message_id": message_id, "user_feedback": 1 }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&h.app, Method::GET, &format!("/api/get-message/{}", message_id), t, None).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["data"]["user_feedback"], json!(1));
    assert_eq!(body["data"]["answer"], json!("Composting turns food scraps into soil."));

    let (_, body) = call(&h.app, Method::GET, "/api/users/u1", t, None).await;
    let persona: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(persona["data"]["age"], json!(29));
    assert_eq!(persona["data"]["city"], json!("Pune"));

    let (_, body) = call(&h.app, Method::GET, "/api/analytics", t, None).await;
    let analytics: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(analytics["data"]["total_messages"], json!(1));
    assert_eq!(analytics["data"]["positive_feedback"], json!(1));

    let (status, body) = call(&h.app, Method::GET, "/api/messages/u1", t, None).await;
    assert_eq!(status, StatusCode::OK);
    let clusters: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(clusters["data"][0]["session_id"], json!("s1"));

    let (status, _) = call(&h.app, Method::GET, "/api/messages/nobody", t, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn model_failure_streams_an_error_event_and_stores_nothing() {
    let h = harness(composting_runtime().failing_after(1));
    let token = token(&h.app).await;
    let t = Some(token.as_str());

    call(&h.app, Method::POST, "/api/update-prompt", t, Some(json!({ "prompt": "Be brief." }))).await;
    let (status, sse) = call(
        &h.app,
        Method::POST,
        "/api/send-message",
        t,
        Some(json!({ "user_id": "u9", "session_id": "s", "incoming_message": "Hello?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(event_data(&sse, "complete").is_none());
    let error: Value = serde_json::from_str(&event_data(&sse, "error").unwrap()).unwrap();
    assert_eq!(error["error"], json!("model_error"));

    let (status, _) = call(&h.app, Method::GET, "/api/messages/u9", t, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The persona was registered before the model call.
    let (status, _) = call(&h.app, Method::GET, "/api/users/u9", t, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn upsert_user_reports_created_then_updated() {
    let h = harness(composting_runtime());
    let token = token(&h.app).await;
    let t = Some(token.as_str());

    let (_, body) = call(&h.app, Method::POST, "/api/upsert-user", t, Some(json!({ "user_id": "u3", "name": "Ravi" }))).await;
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["data"]["created"], json!(true));

    let (_, body) = call(&h.app, Method::POST, "/api/upsert-user", t, Some(json!({ "user_id": "u3", "city": "Delhi" }))).await;
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["data"]["created"], json!(false));

    let (_, body) = call(&h.app, Method::GET, "/api/users", t, None).await;
    let users: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(users["data"][0]["name"], json!("Ravi"));
    assert_eq!(users["data"][0]["city"], json!("Delhi"));
}
