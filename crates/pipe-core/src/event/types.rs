//! Tipos de evento emitidos por el engine y `PipelineEvent`.
//!
//! Cada run emite una secuencia ordenada de eventos a un `EventSink`
//! inyectado. Los eventos no se persisten: son el canal de observabilidad
//! (logs, resumen de la CLI, tests) y no participan en el control de flujo.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::CoreEngineError;
use crate::model::DiagnosticStream;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEventKind {
    /// Primer evento de cada run/iteración.
    RunStarted { pipeline: String, definition_hash: String, stage_count: usize },
    SideInputLoaded { name: String, keys: usize },
    StageStarted { stage_index: usize, stage_id: String, program: String, args: Vec<String> },
    /// Una línea de stdout/stderr del proceso, en el orden en que llegó.
    StageOutput { stage_index: usize, stage_id: String, stream: DiagnosticStream, line: String },
    StageFinished { stage_index: usize, stage_id: String, exit_code: Option<i32>, artifact: Option<String> },
    /// Fallo terminal del stage; el run no continúa.
    StageFailed { stage_index: usize, stage_id: String, error: CoreEngineError },
    RunCompleted { fingerprint: String, artifact: String },
    RunFailed { stage_id: Option<String>, error: CoreEngineError },
    /// Artifact de una iteración entregado al observer.
    IterationDelivered { artifact: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub seq: u64, // orden de append dentro del run
    pub run_id: Uuid,
    pub iteration: u32,
    pub kind: PipelineEventKind,
    pub ts: DateTime<Utc>,
}
