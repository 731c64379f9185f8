//! Errores HTTP del adaptador.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pipe_core::CoreEngineError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown pipeline '{0}'")]
    UnknownPipeline(String),
    /// Un stage (o la entrega de una iteración) falló.
    #[error("{}", describe_failure(.stage_id, .exit_code, .error))]
    RunFailed {
        run_id: Uuid,
        iteration: u32,
        stage_id: Option<String>,
        exit_code: Option<i32>,
        error: CoreEngineError,
        excerpt: String,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

fn describe_failure(stage_id: &Option<String>, exit_code: &Option<i32>, error: &CoreEngineError) -> String {
    let stage = stage_id.as_deref().map(|s| format!("stage '{s}'")).unwrap_or_else(|| "iteration delivery".to_string());
    match exit_code {
        Some(code) => format!("{stage} failed with exit code {code}: {error}"),
        None => format!("{stage} failed: {error}"),
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownPipeline(_) => StatusCode::NOT_FOUND,
            ApiError::RunFailed { error: CoreEngineError::DeadlineExceeded, .. } => StatusCode::GATEWAY_TIMEOUT,
            ApiError::RunFailed { .. } | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        let body = match self {
            ApiError::UnknownPipeline(name) => serde_json::json!({
                "error": "not_found",
                "pipeline": name,
                "message": message,
            }),
            ApiError::RunFailed { run_id, iteration, stage_id, exit_code, error, excerpt } => {
                tracing::error!(%run_id, iteration, stage = ?stage_id, kind = %error.kind(), "request failed: {message}");
                serde_json::json!({
                    "error": "run_failed",
                    "kind": error.kind(),
                    "run_id": run_id,
                    "iteration": iteration,
                    "stage": stage_id,
                    "exit_code": exit_code,
                    "message": message,
                    "diagnostics": excerpt,
                })
            }
            ApiError::Internal(_) => {
                tracing::error!("{message}");
                serde_json::json!({ "error": "internal_error", "message": message })
            }
        };
        (status, Json(body)).into_response()
    }
}
