use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::AppState;
use crate::errors::{ServiceError, ServiceResult};
use crate::exec;
use crate::extract;
use crate::prompt::{self, TemplateStore};
use crate::provider::{self, ModelChoice};
use crate::store;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConvertRequest {
    pub code: String,
    pub input: Value,
    pub function_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PageRequest {
    pub prompt: String,
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UnitPageRequest {
    pub unit1: String,
    pub unit2: String,
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PromptRequest {
    pub prompt: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileContent {
    pub content: String,
}

fn templates(state: &AppState) -> ServiceResult<&TemplateStore> {
    state.templates.as_ref().map_err(|e| e.clone())
}

fn extraction_failure(e: &ServiceError) -> Json<Value> {
    tracing::warn!(error = %e, "could not extract code from model reply");
    Json(json!({ "output": format!("Error in processing model response: {e}") }))
}

fn parse_input(input: &Value) -> ServiceResult<f64> {
    let parsed = match input {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ServiceError::InvalidRequest(format!("input `{input}` is not a number")))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "unitgen" }))
}

pub async fn convert(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConvertRequest>,
) -> ServiceResult<Json<Value>> {
    let input = parse_input(&req.input)?;
    tracing::info!(function = %req.function_name, input, "running generated function");

    match exec::invoke(req.code, req.function_name, input, state.exec_budget).await {
        Ok(output) => Ok(Json(json!({ "output": output }))),
        Err(e @ (ServiceError::NotFound(_) | ServiceError::Unsupported(_))) => {
            tracing::warn!(error = %e, "generated code rejected");
            Ok(Json(json!({ "output": format!("Error: {e}") })))
        }
        Err(e) => Err(e),
    }
}

/// Shared page pipeline: render the user prompt, ask the selected backend,
/// pull out the page markup and store it under the prompt's hash.
async fn create_page(
    state: &AppState,
    template_id: &str,
    vars: &[(&str, &str)],
    model: Option<&str>,
) -> ServiceResult<Json<Value>> {
    let templates = templates(state)?;
    let backend = ModelChoice::from_selector(model).backend();
    let user = prompt::render(templates.get(template_id)?, vars);
    let system = templates.get(backend.system_template)?;
    tracing::info!(model = backend.id, template = template_id, "generating page");

    let reply = state.provider.generate(system, &user, &backend).await?;
    let markup = match extract::extract_page(&reply) {
        Ok(m) => m,
        Err(e @ ServiceError::Extraction(_)) => return Ok(extraction_failure(&e)),
        Err(e) => return Err(e),
    };

    let file_name = store::persist(state.store.as_ref(), &state.pages_route, &user, &markup)?;
    Ok(Json(json!({ "file_name": file_name })))
}

pub async fn create_convert_page(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PageRequest>,
) -> ServiceResult<Json<Value>> {
    tracing::info!(prompt = %req.prompt, "received page prompt");
    create_page(&state, prompt::UNIT_CONVERSION, &[("prompt", req.prompt.as_str())], req.model.as_deref()).await
}

pub async fn create_unit_conversion_page(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UnitPageRequest>,
) -> ServiceResult<Json<Value>> {
    let units = format!("{} to {}", req.unit1, req.unit2);
    tracing::info!(prompt = %units, "received unit conversion prompt");
    create_page(
        &state,
        prompt::GENERAL_INPUT,
        &[("user_input", units.as_str())],
        req.model.as_deref(),
    )
    .await
}

pub async fn process_prompt(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PromptRequest>,
) -> ServiceResult<Json<Value>> {
    tracing::info!(prompt = %req.prompt, "received function prompt");
    let (system, template) = match &state.templates {
        Ok(t) => (
            t.get_or(prompt::PYTHON_SYSTEM, prompt::python_system_prompt()),
            t.get_or(prompt::PYTHON_FUNCTION, prompt::python_function_prompt()),
        ),
        Err(_) => (prompt::python_system_prompt(), prompt::python_function_prompt()),
    };
    let user = prompt::render(template, &[("prompt", req.prompt.as_str())]);

    let reply = state.provider.generate(system, &user, &provider::PYTHON).await?;
    match extract::extract_function(&reply) {
        Ok(f) => {
            tracing::debug!(function = %f.function_name, bytes = f.code.len(), "function extracted");
            Ok(Json(json!({ "output": f.code, "function_name": f.function_name })))
        }
        Err(e @ ServiceError::Extraction(_)) => Ok(extraction_failure(&e)),
        Err(e) => Err(e),
    }
}

pub async fn clear_history(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    match state.store.clear() {
        Ok(removed) => {
            tracing::info!(removed, "history cleared");
            (
                StatusCode::OK,
                Json(json!({ "success": true, "message": "History cleared successfully" })),
            )
        }
        Err(e) => {
            let message = match e {
                ServiceError::Storage(m) => m,
                other => other.to_string(),
            };
            tracing::error!(%message, "clear history failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "message": message })),
            )
        }
    }
}

pub async fn get_file_content(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ServiceResult<Json<Value>> {
    let content = state.store.get(&name)?;
    Ok(Json(json!({ "content": content })))
}

pub async fn save_file_content(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<FileContent>,
) -> ServiceResult<Json<Value>> {
    state.store.put(&name, &req.content)?;
    tracing::info!(page = %name, bytes = req.content.len(), "page saved");
    Ok(Json(json!({ "success": true })))
}

pub async fn get_models(State(state): State<Arc<AppState>>) -> ServiceResult<Json<Value>> {
    let models = templates(&state)?.models()?;
    Ok(Json(json!({ "models": models })))
}
