//! PipeFlow
//!
//! Servidor HTTP que expone pipelines de procesos externos:
//! - `config` carga la configuración `PIPEFLOW_*` del entorno.
//! - `server` monta el router axum y el adaptador request → engine.
//!
//! El motor vive en `pipe-core` y las piezas concretas (catálogo,
//! coeficientes, acumulación) en `pipe-adapters`.

pub mod config;
pub mod server;

use std::sync::Arc;

use pipe_adapters::Catalog;
use pipe_core::{LogEventSink, PipelineEngine, ProcessStageRunner};

use config::AppConfig;
use server::{AppState, RequestAdapter};

/// Arma el estado del servidor a partir de la configuración y un catálogo
/// ya cargado.
pub fn build_state(cfg: &AppConfig, catalog: Catalog) -> AppState {
    let runner = ProcessStageRunner::new().with_diagnostic_cap(cfg.diagnostic_cap_bytes)
                                          .with_default_timeout(cfg.stage_timeout);
    let engine = PipelineEngine::new(runner, &cfg.work_dir).with_sink(Arc::new(LogEventSink));
    let adapter = RequestAdapter::new(Arc::new(catalog), Arc::new(engine), cfg.request_timeout)
        .with_retain_runs(cfg.retain_runs)
        .with_max_concurrent_runs(cfg.max_concurrent_runs);
    AppState::new(adapter, cfg.default_pipeline.as_str())
}
