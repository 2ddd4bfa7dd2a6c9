use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::errors::ServiceResult;
use crate::prompt::TemplateStore;
use crate::provider::DynProvider;
use crate::store::DynStore;

mod handlers;
#[cfg(test)]
mod tests;

/// Everything a handler needs, built once at startup.
pub struct AppState {
    /// The load error is kept so requests can report it.
    pub templates: ServiceResult<TemplateStore>,
    pub provider: DynProvider,
    pub store: DynStore,
    pub pages_route: String,
    pub exec_budget: Duration,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/convert", post(handlers::convert))
        .route("/api/create_convert_page", post(handlers::create_convert_page))
        .route("/api/create_unit_conversion_page", post(handlers::create_unit_conversion_page))
        .route("/api/process-prompt", post(handlers::process_prompt))
        .route("/api/clear_history", post(handlers::clear_history))
        .route("/api/get_file_content/{name}", get(handlers::get_file_content))
        .route("/api/save_file_content/{name}", post(handlers::save_file_content))
        .route("/api/get_models", get(handlers::get_models))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: Arc<AppState>, bind: &str) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("HTTP API listening on {}", bind);
    axum::serve(listener, app).await?;
    Ok(())
}
