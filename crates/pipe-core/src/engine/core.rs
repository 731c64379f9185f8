//! Core PipelineEngine implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{json, Value};
use tokio::time::Instant;
use uuid::Uuid;

use crate::constants::ENGINE_VERSION;
use crate::engine::Pipeline;
use crate::errors::CoreEngineError;
use crate::event::{EventSink, NullEventSink, PipelineEventKind};
use crate::hashing::hash_value;
use crate::model::{ArtifactMap, RunNamespace, RunOutcome, RunResult, SideInput, StageResult, StageSpec};
use crate::runner::{StageContext, StageRunner};

/// Margen sobre el deadline del run antes de que el engine abandone un
/// runner que no lo respeta.
const DEADLINE_GRACE: Duration = Duration::from_secs(2);

/// Parámetros de una ejecución concreta.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub run_id: Uuid,
    /// 1-based; un run sin iteraciones es la iteración 1.
    pub iteration: u32,
    pub deadline: Option<Instant>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { run_id: Uuid::new_v4(),
               iteration: 1,
               deadline: None }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline relativo a ahora.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }
}

/// Motor de ejecución de pipelines lineales.
///
/// Ejecuta los stages en el orden declarado, uno a la vez, dentro del
/// namespace del run. Mantiene el mapa de todos los artifacts producidos
/// hasta el momento y aborta en el primer fallo. No guarda estado entre
/// runs: una misma instancia atiende runs concurrentes.
#[derive(Clone)]
pub struct PipelineEngine {
    runner: Arc<dyn StageRunner>,
    sink: Arc<dyn EventSink>,
    work_dir: PathBuf,
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine").field("work_dir", &self.work_dir).finish_non_exhaustive()
    }
}

/// Estado mutable de un run en curso.
struct RunState {
    ns: RunNamespace,
    artifacts: ArtifactMap,
    side_inputs: IndexMap<String, SideInput>,
    stages: Vec<StageResult>,
}

impl PipelineEngine {
    pub fn new<R: StageRunner + 'static>(runner: R, work_dir: impl Into<PathBuf>) -> Self {
        Self { runner: Arc::new(runner),
               sink: Arc::new(NullEventSink),
               work_dir: work_dir.into() }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn sink(&self) -> &dyn EventSink {
        self.sink.as_ref()
    }

    /// Ejecuta el pipeline completo. Nunca devuelve `Err`: el fallo viaja en
    /// `RunResult::outcome`.
    pub async fn run(&self, pipeline: &Pipeline, opts: RunOptions) -> RunResult {
        let RunOptions { run_id, iteration, deadline } = opts;
        let emit = |kind: PipelineEventKind| self.sink.emit(run_id, iteration, kind);

        emit(PipelineEventKind::RunStarted { pipeline: pipeline.name().to_string(),
                                             definition_hash: pipeline.definition_hash().to_string(),
                                             stage_count: pipeline.len() });

        let ns = match RunNamespace::create(&self.work_dir, run_id, iteration).await {
            Ok(ns) => ns,
            Err(e) => {
                let ns = RunNamespace::new(&self.work_dir, run_id, iteration);
                let state = RunState { ns,
                                       artifacts: ArtifactMap::new(),
                                       side_inputs: IndexMap::new(),
                                       stages: Vec::new() };
                return self.finish_failed(pipeline, state, None, e);
            }
        };
        let mut state = RunState { ns,
                                   artifacts: ArtifactMap::new(),
                                   side_inputs: IndexMap::new(),
                                   stages: Vec::with_capacity(pipeline.len()) };

        // Side inputs: una carga por run, antes del primer stage.
        for provider in pipeline.side_inputs() {
            let provided = match deadline {
                Some(d) => match tokio::time::timeout_at(d, provider.provide(&state.ns)).await {
                    Ok(r) => r,
                    Err(_) => Err(CoreEngineError::DeadlineExceeded),
                },
                None => provider.provide(&state.ns).await,
            };
            match provided {
                Ok(p) => {
                    emit(PipelineEventKind::SideInputLoaded { name: provider.name().to_string(),
                                                              keys: p.input.values().len() });
                    for a in p.artifacts {
                        state.artifacts.insert(a.name().to_string(), a);
                    }
                    state.side_inputs.insert(provider.name().to_string(), p.input);
                }
                Err(e) => return self.finish_failed(pipeline, state, None, e),
            }
        }

        for (index, spec) in pipeline.stages().iter().enumerate() {
            let result = self.run_stage(index, spec, &state, deadline).await;
            if let Some(error) = result.error.clone() {
                emit(PipelineEventKind::StageFailed { stage_index: index,
                                                      stage_id: spec.id.clone(),
                                                      error: error.clone() });
                state.stages.push(result);
                return self.finish_failed(pipeline, state, Some(spec.id.clone()), error);
            }
            emit(PipelineEventKind::StageFinished { stage_index: index,
                                                    stage_id: spec.id.clone(),
                                                    exit_code: result.exit_code,
                                                    artifact: result.artifact.as_ref().map(|a| a.name().to_string()) });
            if let Some(a) = &result.artifact {
                state.artifacts.insert(a.name().to_string(), a.clone());
            }
            state.stages.push(result);
        }

        let artifact = state.stages.last().and_then(|s| s.artifact.clone());
        match artifact {
            Some(artifact) => {
                let fingerprint = fingerprint(pipeline, &state);
                emit(PipelineEventKind::RunCompleted { fingerprint: fingerprint.clone(),
                                                       artifact: artifact.location().display().to_string() });
                RunResult { run_id,
                            iteration,
                            pipeline: pipeline.name().to_string(),
                            stages: state.stages,
                            outcome: RunOutcome::Completed { artifact },
                            side_inputs: state.side_inputs,
                            fingerprint }
            }
            None => {
                let err = CoreEngineError::Internal("last stage produced no artifact".into());
                let last = pipeline.stages().last().map(|s| s.id.clone());
                self.finish_failed(pipeline, state, last, err)
            }
        }
    }

    /// Comprueba inputs y deadline, y delega en el runner.
    async fn run_stage(&self, index: usize, spec: &StageSpec, state: &RunState, deadline: Option<Instant>) -> StageResult {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return StageResult::failed_before_launch(spec.id.clone(), CoreEngineError::DeadlineExceeded);
        }

        let mut inputs = ArtifactMap::new();
        for name in &spec.inputs {
            match state.artifacts.get(name) {
                Some(a) if a.exists() => {
                    inputs.insert(name.clone(), a.clone());
                }
                _ => {
                    return StageResult::failed_before_launch(spec.id.clone(),
                                                             CoreEngineError::UpstreamArtifactMissing(name.clone()))
                }
            }
        }

        let ctx = StageContext { stage_index: index,
                                 namespace: &state.ns,
                                 side_inputs: &state.side_inputs,
                                 sink: self.sink.as_ref(),
                                 deadline };
        let mut result = match deadline {
            Some(d) => match tokio::time::timeout_at(d + DEADLINE_GRACE, self.runner.execute(spec, &inputs, &ctx)).await {
                Ok(r) => r,
                Err(_) => StageResult::failed_before_launch(spec.id.clone(), CoreEngineError::DeadlineExceeded),
            },
            None => self.runner.execute(spec, &inputs, &ctx).await,
        };

        if result.error.is_none() && spec.output.is_some() && result.artifact.is_none() {
            result.error = Some(CoreEngineError::PostProcessFailure(format!("stage '{}' reported success without its declared output",
                                                                            spec.id)));
        }
        result
    }

    fn finish_failed(&self, pipeline: &Pipeline, state: RunState, stage_id: Option<String>, error: CoreEngineError) -> RunResult {
        let run_id = state.ns.run_id();
        let iteration = state.ns.iteration();
        self.sink.emit(run_id,
                       iteration,
                       PipelineEventKind::RunFailed { stage_id: stage_id.clone(),
                                                      error: error.clone() });
        let fingerprint = fingerprint(pipeline, &state);
        RunResult { run_id,
                    iteration,
                    pipeline: pipeline.name().to_string(),
                    stages: state.stages,
                    outcome: RunOutcome::Failed { stage_id, error },
                    side_inputs: state.side_inputs,
                    fingerprint }
    }
}

/// Fingerprint del run: versión del motor, hash de la definición y la
/// secuencia de resultados. Las ubicaciones se toman relativas al namespace
/// y los errores por categoría, así el run_id no altera el valor.
fn fingerprint(pipeline: &Pipeline, state: &RunState) -> String {
    let stages: Vec<Value> = state.stages
                                  .iter()
                                  .map(|s| {
                                      json!({
                                          "stage_id": s.stage_id,
                                          "exit_code": s.exit_code,
                                          "artifact": s.artifact.as_ref().map(|a| json!({
                                              "name": a.name(),
                                              "location": relative_location(a.location(), state.ns.dir()),
                                          })),
                                          "error": s.error.as_ref().map(|e| e.kind().as_str()),
                                      })
                                  })
                                  .collect();
    hash_value(&json!({
        "engine_version": ENGINE_VERSION,
        "definition_hash": pipeline.definition_hash(),
        "stages": stages,
    }))
}

fn relative_location(location: &Path, dir: &Path) -> String {
    match location.strip_prefix(dir) {
        Ok(rel) => rel.display().to_string(),
        Err(_) => location.display().to_string(),
    }
}
