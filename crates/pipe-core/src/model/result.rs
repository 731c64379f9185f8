//! Resultados de stage y de run.
//!
//! Sólo viven mientras dura el run que los contiene: el engine no los
//! persiste.
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::diagnostics::{excerpt, DiagnosticLine};
use super::{ArtifactRef, SideInput};
use crate::errors::CoreEngineError;

/// Líneas incluidas en `StageResult::excerpt`.
pub const EXCERPT_LINES: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: String,
    /// `None` si no se pudo lanzar o si terminó por señal/timeout.
    pub exit_code: Option<i32>,
    pub diagnostics: Vec<DiagnosticLine>,
    /// Líneas descartadas por el tope de diagnóstico.
    pub diagnostics_dropped: usize,
    pub artifact: Option<ArtifactRef>,
    pub error: Option<CoreEngineError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StageResult {
    /// Resultado de fallo sin proceso asociado (lanzamiento, dependencia).
    pub fn failed_before_launch(stage_id: impl Into<String>, error: CoreEngineError) -> Self {
        let now = Utc::now();
        Self { stage_id: stage_id.into(),
               exit_code: None,
               diagnostics: Vec::new(),
               diagnostics_dropped: 0,
               artifact: None,
               error: Some(error),
               started_at: now,
               finished_at: now }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn excerpt(&self) -> String {
        excerpt(&self.diagnostics, EXCERPT_LINES)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed { artifact: ArtifactRef },
    /// `stage_id` es `None` cuando el fallo ocurrió antes del primer stage
    /// (por ejemplo al cargar un side input).
    Failed { stage_id: Option<String>, error: CoreEngineError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub iteration: u32,
    pub pipeline: String,
    pub stages: Vec<StageResult>,
    pub outcome: RunOutcome,
    /// Side inputs cargados para este run (nombre → valores).
    pub side_inputs: IndexMap<String, SideInput>,
    /// Hash de versión del motor + definición + secuencia de resultados.
    pub fingerprint: String,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }

    pub fn final_artifact(&self) -> Option<&ArtifactRef> {
        match &self.outcome {
            RunOutcome::Completed { artifact } => Some(artifact),
            RunOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&CoreEngineError> {
        match &self.outcome {
            RunOutcome::Completed { .. } => None,
            RunOutcome::Failed { error, .. } => Some(error),
        }
    }

    /// Stage que provocó el fallo, si lo hay.
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stages.iter().find(|s| !s.is_success())
    }

    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.stage_id.as_str()).collect()
    }
}
