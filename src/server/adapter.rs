//! Traducción de un request HTTP a una ejecución del engine.
//!
//! Un request = un run (o una secuencia de iteraciones) bajo su propio
//! `run_id`. El artifact se lee completo antes de borrar el namespace; con
//! `retain_runs` el directorio se conserva para inspección.
//!
//! El run se ejecuta en una tarea propia. Si el cliente se desconecta y axum
//! descarta el handler, `RunTask` aborta esa tarea (lo que mata los procesos
//! del stage en curso) y borra el namespace igualmente.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use pipe_adapters::{run_entry, Catalog, EntryRun};
use pipe_core::PipelineEngine;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::error::ApiError;

pub const HEADER_RUN_ID: &str = "x-pipeflow-run-id";
pub const HEADER_FINGERPRINT: &str = "x-pipeflow-fingerprint";

/// Bytes del artifact final listos para enviarse.
#[derive(Debug, Clone)]
pub struct ArtifactResponse {
    pub run_id: Uuid,
    pub fingerprint: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl IntoResponse for ArtifactResponse {
    fn into_response(self) -> Response {
        let len = self.body.len().to_string();
        ([(header::CONTENT_TYPE.as_str(), self.content_type),
          (header::CONTENT_LENGTH.as_str(), len),
          (HEADER_RUN_ID, self.run_id.to_string()),
          (HEADER_FINGERPRINT, self.fingerprint)],
         self.body).into_response()
    }
}

#[derive(Debug)]
pub struct RequestAdapter {
    catalog: Arc<Catalog>,
    engine: Arc<PipelineEngine>,
    request_timeout: Duration,
    retain_runs: bool,
    limiter: Option<Arc<Semaphore>>,
}

impl RequestAdapter {
    pub fn new(catalog: Arc<Catalog>, engine: Arc<PipelineEngine>, request_timeout: Duration) -> Self {
        Self { catalog,
               engine,
               request_timeout,
               retain_runs: false,
               limiter: None }
    }

    pub fn with_retain_runs(mut self, retain: bool) -> Self {
        self.retain_runs = retain;
        self
    }

    /// Máximo de runs simultáneos; el resto espera turno.
    pub fn with_max_concurrent_runs(mut self, max: Option<usize>) -> Self {
        self.limiter = max.map(|n| Arc::new(Semaphore::new(n)));
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn handle(&self, pipeline: &str) -> Result<ArtifactResponse, ApiError> {
        let entry = self.catalog
                        .get(pipeline)
                        .ok_or_else(|| ApiError::UnknownPipeline(pipeline.to_string()))?
                        .clone();

        let permit = match &self.limiter {
            Some(sem) => Some(sem.clone()
                                 .acquire_owned()
                                 .await
                                 .map_err(|e| ApiError::Internal(format!("run limiter closed: {e}")))?),
            None => None,
        };

        let run_id = Uuid::new_v4();
        let deadline = Instant::now() + self.request_timeout;
        tracing::info!(%run_id, pipeline, iterations = entry.iteration.count.get(), "request accepted");

        let content_type = entry.content_type.clone();
        let engine = self.engine.clone();
        let run_dir = engine.work_dir().join(run_id.to_string());
        let mut task = RunTask::new(tokio::spawn(async move {
                                        let _permit = permit;
                                        run_entry(&engine, &entry, &entry.iteration, run_id, Some(deadline)).await
                                    }),
                                    run_dir,
                                    self.retain_runs);

        let run = task.join().await?;
        let outcome = self.respond(&run, &content_type).await;
        self.cleanup(&run).await;
        task.finish();
        outcome
    }

    async fn respond(&self, run: &EntryRun, content_type: &str) -> Result<ArtifactResponse, ApiError> {
        let artifact = match (&run.artifact, run.is_success()) {
            (Some(artifact), true) => artifact,
            _ => return Err(failure_of(run)),
        };
        let body = artifact.read_bytes().await.map_err(|e| {
                                                  ApiError::Internal(format!("cannot read artifact {}: {e}",
                                                                             artifact.location().display()))
                                              })?;
        tracing::info!(run_id = %run.run_id(), bytes = body.len(), artifact = %artifact.location().display(), "request completed");
        Ok(ArtifactResponse { run_id: run.run_id(),
                              fingerprint: run.fingerprint().unwrap_or_default().to_string(),
                              content_type: content_type.to_string(),
                              body })
    }

    async fn cleanup(&self, run: &EntryRun) {
        if self.retain_runs {
            tracing::debug!(dir = %run.run_dir.display(), "run directory retained");
            return;
        }
        if let Err(e) = run.remove_run_dir().await {
            tracing::warn!(dir = %run.run_dir.display(), "cannot remove run directory: {e}");
        }
    }
}

/// Tarea de un run en curso. Si se suelta antes de `finish` (handler
/// descartado) aborta la tarea, espera a que su future se destruya y borra
/// el directorio del run salvo `retain`.
struct RunTask {
    handle: Option<JoinHandle<EntryRun>>,
    run_dir: PathBuf,
    retain: bool,
    done: bool,
}

impl RunTask {
    fn new(handle: JoinHandle<EntryRun>, run_dir: PathBuf, retain: bool) -> Self {
        Self { handle: Some(handle),
               run_dir,
               retain,
               done: false }
    }

    async fn join(&mut self) -> Result<EntryRun, ApiError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(ApiError::Internal("run already joined".into()));
        };
        let joined = handle.await;
        self.handle = None;
        joined.map_err(|e| ApiError::Internal(format!("run task failed: {e}")))
    }

    fn finish(&mut self) {
        self.done = true;
    }
}

impl Drop for RunTask {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let handle = self.handle.take();
        if let Some(h) = &handle {
            h.abort();
        }
        if self.retain {
            return;
        }
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let run_dir = std::mem::take(&mut self.run_dir);
        tracing::warn!(dir = %run_dir.display(), "request dropped before completion; run aborted");
        rt.spawn(async move {
              // El future abortado (y sus procesos) se destruye antes de borrar.
              if let Some(h) = handle {
                  let _ = h.await;
              }
              match tokio::fs::remove_dir_all(&run_dir).await {
                  Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                      tracing::warn!(dir = %run_dir.display(), "cannot remove run directory: {e}")
                  }
                  _ => {}
              }
          });
    }
}
