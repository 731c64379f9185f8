//! Sinks de eventos.
//!
//! El engine recibe un `Arc<dyn EventSink>`; nunca escribe a stdout
//! directamente. `LogEventSink` reenvía al facade `log`, `InMemoryEventSink`
//! guarda los eventos por run para inspección.
use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use super::{PipelineEvent, PipelineEventKind};
use crate::model::DiagnosticStream;

pub trait EventSink: Send + Sync {
    fn emit(&self, run_id: Uuid, iteration: u32, kind: PipelineEventKind);
}

/// Descarta todo.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _run_id: Uuid, _iteration: u32, _kind: PipelineEventKind) {}
}

/// Append-only en memoria, agrupado por run. Guarda también cada línea de
/// diagnóstico: pensado para tests y ejecuciones cortas.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    inner: Mutex<HashMap<Uuid, Vec<PipelineEvent>>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Eventos de un run (todas sus iteraciones) en orden de append.
    pub fn list(&self, run_id: Uuid) -> Vec<PipelineEvent> {
        self.inner
            .lock()
            .map(|m| m.get(&run_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Variante compacta de la secuencia, útil en asserts.
    pub fn variants(&self, run_id: Uuid) -> Vec<&'static str> {
        self.list(run_id)
            .iter()
            .map(|e| match e.kind {
                PipelineEventKind::RunStarted { .. } => "I",
                PipelineEventKind::SideInputLoaded { .. } => "L",
                PipelineEventKind::StageStarted { .. } => "S",
                PipelineEventKind::StageOutput { .. } => "O",
                PipelineEventKind::StageFinished { .. } => "F",
                PipelineEventKind::StageFailed { .. } => "X",
                PipelineEventKind::RunCompleted { .. } => "C",
                PipelineEventKind::RunFailed { .. } => "R",
                PipelineEventKind::IterationDelivered { .. } => "D",
            })
            .collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, run_id: Uuid, iteration: u32, kind: PipelineEventKind) {
        if let Ok(mut map) = self.inner.lock() {
            let vec = map.entry(run_id).or_default();
            let seq = vec.len() as u64;
            vec.push(PipelineEvent { seq,
                                     run_id,
                                     iteration,
                                     kind,
                                     ts: Utc::now() });
        }
    }
}

/// Reenvía cada evento a `log` con target `pipeflow::stage` (líneas de
/// diagnóstico) o `pipeflow::run` (ciclo de vida).
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, run_id: Uuid, iteration: u32, kind: PipelineEventKind) {
        match kind {
            PipelineEventKind::StageOutput { stage_id, stream, line, .. } => match stream {
                DiagnosticStream::Stdout => log::info!(target: "pipeflow::stage", "run={run_id} iter={iteration} stage={stage_id} stdout: {line}"),
                DiagnosticStream::Stderr => log::warn!(target: "pipeflow::stage", "run={run_id} iter={iteration} stage={stage_id} stderr: {line}"),
            },
            PipelineEventKind::RunStarted { pipeline, stage_count, .. } => {
                log::info!(target: "pipeflow::run", "run={run_id} iter={iteration} pipeline={pipeline} stages={stage_count} started")
            }
            PipelineEventKind::SideInputLoaded { name, keys } => {
                log::debug!(target: "pipeflow::run", "run={run_id} iter={iteration} side_input={name} keys={keys}")
            }
            PipelineEventKind::StageStarted { stage_id, program, args, .. } => {
                log::info!(target: "pipeflow::run", "run={run_id} iter={iteration} stage={stage_id} launching {program} {args:?}")
            }
            PipelineEventKind::StageFinished { stage_id, exit_code, .. } => {
                log::info!(target: "pipeflow::run", "run={run_id} iter={iteration} stage={stage_id} exited code={exit_code:?}")
            }
            PipelineEventKind::StageFailed { stage_id, error, .. } => {
                log::error!(target: "pipeflow::run", "run={run_id} iter={iteration} stage={stage_id} failed kind={} error={error}", error.kind())
            }
            PipelineEventKind::RunCompleted { fingerprint, artifact } => {
                log::info!(target: "pipeflow::run", "run={run_id} iter={iteration} completed artifact={artifact} fingerprint={fingerprint}")
            }
            PipelineEventKind::RunFailed { stage_id, error } => {
                log::error!(target: "pipeflow::run", "run={run_id} iter={iteration} failed stage={stage_id:?} error={error}")
            }
            PipelineEventKind::IterationDelivered { artifact } => {
                log::info!(target: "pipeflow::run", "run={run_id} iter={iteration} delivered {artifact}")
            }
        }
    }
}
