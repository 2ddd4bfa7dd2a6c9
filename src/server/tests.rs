use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use super::{router, AppState};
use crate::errors::{ServiceError, ServiceResult};
use crate::prompt::TemplateStore;
use crate::provider::{Backend, Provider};
use crate::store::{artifact_key, DirStore, PageStore};

const PROMPTS: &str = r#"{
    "GeneralInputPrompt": "Create a page for: {user_input}",
    "UnitConversionPrompt": "Create a page that converts {prompt} both ways.",
    "RefinedSystemPrompt": "system for gpt-4",
    "RefinedSystemPrompt3.5": "system for gpt-3.5",
    "models": ["GPT-3.5", "GPT-4"]
}"#;

#[derive(Debug, Clone, PartialEq)]
struct Call {
    system: String,
    user: String,
    backend: &'static str,
}

/// Replays a canned reply and records what it was asked.
struct Scripted {
    reply: ServiceResult<String>,
    calls: Mutex<Vec<Call>>,
}

#[async_trait]
impl Provider for Scripted {
    async fn generate(&self, system: &str, user: &str, backend: &Backend) -> ServiceResult<String> {
        self.calls.lock().push(Call {
            system: system.into(),
            user: user.into(),
            backend: backend.id,
        });
        self.reply.clone()
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    provider: Arc<Scripted>,
    store: Arc<DirStore>,
    app: Router,
}

fn harness_with(templates: ServiceResult<TemplateStore>, reply: ServiceResult<String>) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(DirStore::new(tmp.path().join("convert_pages")));
    let provider = Arc::new(Scripted { reply, calls: Mutex::new(Vec::new()) });
    let state = AppState {
        templates,
        provider: provider.clone(),
        store: store.clone(),
        pages_route: "convert_pages".into(),
        exec_budget: Duration::from_secs(2),
    };
    Harness { _tmp: tmp, provider, store, app: router(Arc::new(state)) }
}

fn harness(reply: &str) -> Harness {
    harness_with(TemplateStore::from_json(PROMPTS), Ok(reply.to_string()))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

const PAGE_REPLY: &str =
    "Here is your page:\n```typescript\nexport default function App() { return <div/>; }\n```\nEnjoy!";

#[tokio::test]
async fn convert_page_end_to_end() {
    let h = harness(PAGE_REPLY);
    let (status, body) = call(
        &h.app,
        "POST",
        "/api/create_convert_page",
        Some(json!({ "prompt": "kilometers to miles", "model": "GPT-3.5" })),
    )
    .await;

    let user = "Create a page that converts kilometers to miles both ways.";
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        h.provider.calls.lock().clone(),
        vec![Call {
            system: "system for gpt-3.5".into(),
            user: user.into(),
            backend: "gpt-3.5-turbo-1106",
        }]
    );
    let key = artifact_key(user);
    assert_eq!(body, json!({ "file_name": format!("convert_pages/{key}") }));
    assert_eq!(h.store.get(&key).unwrap(), "export default function App() { return <div/>; }");
}

#[tokio::test]
async fn unit_conversion_page_end_to_end() {
    let h = harness(PAGE_REPLY);
    let (status, body) = call(
        &h.app,
        "POST",
        "/api/create_unit_conversion_page",
        Some(json!({ "unit1": "kilometers", "unit2": "miles", "model": "GPT-3.5" })),
    )
    .await;

    let user = "Create a page for: kilometers to miles";
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        h.provider.calls.lock().clone(),
        vec![Call {
            system: "system for gpt-3.5".into(),
            user: user.into(),
            backend: "gpt-3.5-turbo-1106",
        }]
    );
    let key = artifact_key(user);
    assert_eq!(body, json!({ "file_name": format!("convert_pages/{key}") }));
    assert_eq!(h.store.get(&key).unwrap(), "export default function App() { return <div/>; }");
}

#[tokio::test]
async fn convert_page_selects_backend_by_model() {
    let h = harness(PAGE_REPLY);
    for model in [json!("GPT-4"), json!("something-else"), Value::Null] {
        let (status, _) = call(
            &h.app,
            "POST",
            "/api/create_convert_page",
            Some(json!({ "prompt": "liters to gallons", "model": model })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let calls = h.provider.calls.lock().clone();
    assert_eq!(calls[0].backend, "gpt-4-1106-preview");
    assert_eq!(calls[0].system, "system for gpt-4");
    assert_eq!(calls[0].user, "Create a page that converts liters to gallons both ways.");
    for fallback in &calls[1..] {
        assert_eq!(fallback.backend, "gpt-3.5-turbo-1106");
        assert_eq!(fallback.system, "system for gpt-3.5");
    }
    assert_eq!(h.store.list().unwrap().len(), 1);
}

#[tokio::test]
async fn unfenced_page_reply_is_reported_not_stored() {
    let h = harness("export default function App() { return <div/>; }");
    let (status, body) = call(
        &h.app,
        "POST",
        "/api/create_convert_page",
        Some(json!({ "prompt": "kg to lb" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let output = body["output"].as_str().unwrap();
    assert!(output.starts_with("Error in processing model response"), "{output}");
    assert!(h.store.list().unwrap().is_empty());
}

#[tokio::test]
async fn provider_failure_is_a_server_error() {
    let h = harness_with(
        TemplateStore::from_json(PROMPTS),
        Err(ServiceError::Transport("connection refused".into())),
    );
    let (status, body) = call(
        &h.app,
        "POST",
        "/api/create_convert_page",
        Some(json!({ "prompt": "kg to lb" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn process_prompt_returns_function_code() {
    let h = harness("def km_to_miles(km):\n    return km * 0.621371\n\nprint(km_to_miles(1))");
    let (status, body) = call(
        &h.app,
        "POST",
        "/api/process-prompt",
        Some(json!({ "prompt": "converts kilometers to miles" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "output": "def km_to_miles(km):\n    return km * 0.621371", "function_name": "km_to_miles" })
    );
    let calls = h.provider.calls.lock().clone();
    assert!(calls[0].user.contains("a function that converts kilometers to miles."));
    assert!(calls[0].system.starts_with("You are a skilled Python programmer"));
}

#[tokio::test]
async fn process_prompt_reports_missing_function() {
    let h = harness("Sorry, I can't do that.");
    let (status, body) = call(&h.app, "POST", "/api/process-prompt", Some(json!({ "prompt": "x" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["output"].as_str().unwrap().contains("No valid Python function definition found."));
}

#[tokio::test]
async fn convert_runs_generated_function() {
    let h = harness("");
    let code = "def km_to_miles(km):\n    return km * 0.621371";
    for input in [json!(10), json!("10")] {
        let (status, body) = call(
            &h.app,
            "POST",
            "/api/convert",
            Some(json!({ "code": code, "input": input, "function_name": "km_to_miles" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!((body["output"].as_f64().unwrap() - 6.21371).abs() < 1e-9);
    }
}

#[tokio::test]
async fn convert_reports_missing_or_rejected_code() {
    let h = harness("");
    let (status, body) = call(
        &h.app,
        "POST",
        "/api/convert",
        Some(json!({ "code": "def f(x):\n    return x", "input": 1, "function_name": "g" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["output"].as_str().unwrap().starts_with("Error:"));

    let (status, body) = call(
        &h.app,
        "POST",
        "/api/convert",
        Some(json!({ "code": "import os\ndef f(x):\n    return x", "input": 1, "function_name": "f" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["output"].as_str().unwrap().contains("unsupported"));

    let (status, _) = call(
        &h.app,
        "POST",
        "/api/convert",
        Some(json!({ "code": "def f(x):\n    return x", "input": "ten", "function_name": "f" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn clear_history_on_empty_directory_succeeds() {
    let h = harness("");
    let (status, body) = call(&h.app, "POST", "/api/clear_history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "message": "History cleared successfully" }));
}

#[tokio::test]
async fn clear_history_removes_generated_pages() {
    let h = harness(PAGE_REPLY);
    call(&h.app, "POST", "/api/create_convert_page", Some(json!({ "prompt": "a" }))).await;
    call(&h.app, "POST", "/api/create_convert_page", Some(json!({ "prompt": "b" }))).await;
    assert_eq!(h.store.list().unwrap().len(), 2);

    let (status, _) = call(&h.app, "POST", "/api/clear_history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.store.list().unwrap().is_empty());
}

#[tokio::test]
async fn file_content_round_trip() {
    let h = harness("");
    let (status, body) = call(
        &h.app,
        "POST",
        "/api/save_file_content/convert_abc",
        Some(json!({ "content": "const x = 1;" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let (status, body) = call(&h.app, "GET", "/api/get_file_content/convert_abc", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "content": "const x = 1;" }));
}

#[tokio::test]
async fn file_content_errors_use_status_codes() {
    let h = harness("");
    let (status, body) = call(&h.app, "GET", "/api/get_file_content/convert_missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = call(&h.app, "GET", "/api/get_file_content/..%2Fprompt", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn models_come_from_configuration() {
    let h = harness("");
    let (status, body) = call(&h.app, "GET", "/api/get_models", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "models": ["GPT-3.5", "GPT-4"] }));
}

#[tokio::test]
async fn models_report_missing_and_malformed_configuration() {
    let missing = harness_with(
        Err(ServiceError::NotFound("prompt.json".into())),
        Ok(String::new()),
    );
    let (status, _) = call(&missing.app, "GET", "/api/get_models", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let malformed = harness_with(TemplateStore::from_json("{oops"), Ok(String::new()));
    let (status, _) = call(&malformed.app, "GET", "/api/get_models", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_is_ok() {
    let h = harness("");
    let (status, body) = call(&h.app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
