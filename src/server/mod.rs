//! Servidor HTTP.
//!
//! Rutas:
//! - `GET|POST /generate`: ejecuta el pipeline por defecto.
//! - `GET|POST /pipelines/{name}/run`: ejecuta un pipeline del catálogo.
//! - `GET /pipelines`: lista el catálogo.
//! - `GET /health`: estado del proceso.
pub mod adapter;
pub mod error;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use pipe_core::constants::ENGINE_VERSION;
use serde::Serialize;
use tower_http::trace::TraceLayer;

pub use adapter::{ArtifactResponse, RequestAdapter, HEADER_FINGERPRINT, HEADER_RUN_ID};
pub use error::ApiError;

#[derive(Debug, Clone)]
pub struct AppState {
    pub adapter: Arc<RequestAdapter>,
    pub default_pipeline: Arc<str>,
}

impl AppState {
    pub fn new(adapter: RequestAdapter, default_pipeline: impl Into<Arc<str>>) -> Self {
        Self { adapter: Arc::new(adapter),
               default_pipeline: default_pipeline.into() }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/generate", get(generate).post(generate))
                 .route("/pipelines", get(list_pipelines))
                 .route("/pipelines/{name}/run", get(run_pipeline).post(run_pipeline))
                 .route("/health", get(health))
                 .layer(TraceLayer::new_for_http())
                 .with_state(state)
}

async fn generate(State(state): State<AppState>) -> Result<ArtifactResponse, ApiError> {
    state.adapter.handle(&state.default_pipeline).await
}

async fn run_pipeline(State(state): State<AppState>, Path(name): Path<String>) -> Result<ArtifactResponse, ApiError> {
    state.adapter.handle(&name).await
}

#[derive(Debug, Serialize)]
struct PipelineSummary {
    name: String,
    description: Option<String>,
    stages: Vec<String>,
    iterations: u32,
    content_type: String,
    definition_hash: String,
}

async fn list_pipelines(State(state): State<AppState>) -> Json<Vec<PipelineSummary>> {
    let list = state.adapter
                    .catalog()
                    .entries()
                    .map(|e| PipelineSummary { name: e.name().to_string(),
                                               description: e.description.clone(),
                                               stages: e.pipeline.stages().iter().map(|s| s.id.clone()).collect(),
                                               iterations: e.iteration.count.get(),
                                               content_type: e.content_type.clone(),
                                               definition_hash: e.pipeline.definition_hash().to_string() })
                    .collect();
    Json(list)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "engine": ENGINE_VERSION,
    }))
}
