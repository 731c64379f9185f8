//! Iteraciones secuenciales de un mismo pipeline.
//!
//! `IterationController` ejecuta el pipeline `count` veces bajo un mismo
//! run_id (cada iteración en su propio directorio `iter-<k>`). La iteración
//! k+1 empieza sólo cuando la k terminó y su artifact fue entregado al
//! observer. El primer fallo (de un stage, de la augmentación posterior o
//! del propio observer) detiene la secuencia.
use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use crate::engine::{Pipeline, PipelineEngine, RunOptions};
use crate::errors::CoreEngineError;
use crate::event::PipelineEventKind;
use crate::model::{ArtifactRef, RunOutcome, RunResult};
use crate::transform;

/// Lo que recibe el observer al terminar con éxito una iteración.
#[derive(Debug, Clone)]
pub struct IterationOutput {
    pub run_id: Uuid,
    /// 1-based.
    pub iteration: u32,
    /// Artifact final de la iteración (augmentado si así se configuró).
    pub artifact: ArtifactRef,
}

/// Consumidor de los artifacts de cada iteración, en orden.
#[async_trait]
pub trait IterationObserver: Send {
    async fn deliver(&mut self, output: &IterationOutput) -> Result<(), CoreEngineError>;
}

/// Adapta un closure síncrono a `IterationObserver`.
pub struct FnObserver<F>(pub F);

#[async_trait]
impl<F> IterationObserver for FnObserver<F> where F: FnMut(&IterationOutput) -> Result<(), CoreEngineError> + Send
{
    async fn deliver(&mut self, output: &IterationOutput) -> Result<(), CoreEngineError> {
        (self.0)(output)
    }
}

/// Observer que no hace nada (sólo interesa el `IterationReport`).
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardObserver;

#[async_trait]
impl IterationObserver for DiscardObserver {
    async fn deliver(&mut self, _output: &IterationOutput) -> Result<(), CoreEngineError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IterationFailure {
    pub iteration: u32,
    /// Stage culpable; `None` si falló la entrega o la augmentación.
    pub stage_id: Option<String>,
    pub error: CoreEngineError,
}

#[derive(Debug, Clone)]
pub struct IterationReport {
    pub run_id: Uuid,
    pub requested: u32,
    /// Un `RunResult` por iteración ejecutada (incluida la que falló).
    pub results: Vec<RunResult>,
    /// Artifacts entregados, en orden de iteración.
    pub delivered: Vec<ArtifactRef>,
    pub failure: Option<IterationFailure>,
}

impl IterationReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.delivered.len() as u32 == self.requested
    }

    pub fn last_artifact(&self) -> Option<&ArtifactRef> {
        self.delivered.last()
    }

    /// `RunResult` de la iteración que falló, si existe.
    pub fn failed_result(&self) -> Option<&RunResult> {
        self.results.iter().find(|r| !r.is_success())
    }
}

#[derive(Debug)]
pub struct IterationController<'e> {
    engine: &'e PipelineEngine,
    count: NonZeroU32,
    delay: Duration,
    augment_with: Option<String>,
    deadline: Option<Instant>,
    run_id: Uuid,
}

impl<'e> IterationController<'e> {
    pub fn new(engine: &'e PipelineEngine) -> Self {
        Self { engine,
               count: NonZeroU32::MIN,
               delay: Duration::ZERO,
               augment_with: None,
               deadline: None,
               run_id: Uuid::new_v4() }
    }

    pub fn count(mut self, count: NonZeroU32) -> Self {
        self.count = count;
        self
    }

    /// Espera entre iteraciones; no se aplica tras la última.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Side input que se antepone al artifact final antes de entregarlo.
    pub fn augment_with(mut self, side_input: impl Into<String>) -> Self {
        self.augment_with = Some(side_input.into());
        self
    }

    pub fn deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub async fn run(&self, pipeline: &Pipeline, observer: &mut dyn IterationObserver) -> IterationReport {
        let requested = self.count.get();
        let mut report = IterationReport { run_id: self.run_id,
                                           requested,
                                           results: Vec::with_capacity(requested as usize),
                                           delivered: Vec::with_capacity(requested as usize),
                                           failure: None };

        for k in 1..=requested {
            let mut opts = RunOptions::new().run_id(self.run_id).iteration(k);
            opts.deadline = self.deadline;
            let result = self.engine.run(pipeline, opts).await;

            let artifact = match result.outcome.clone() {
                RunOutcome::Completed { artifact } => artifact,
                RunOutcome::Failed { stage_id, error } => {
                    report.failure = Some(IterationFailure { iteration: k,
                                                             stage_id,
                                                             error });
                    report.results.push(result);
                    break;
                }
            };

            let delivered = match self.finish_iteration(k, artifact, &result, observer).await {
                Ok(a) => a,
                Err(error) => {
                    report.failure = Some(IterationFailure { iteration: k,
                                                             stage_id: None,
                                                             error });
                    report.results.push(result);
                    break;
                }
            };
            report.results.push(result);
            report.delivered.push(delivered);

            if k < requested && !self.delay.is_zero() {
                let wake = Instant::now() + self.delay;
                let wake = match self.deadline {
                    Some(d) if d < wake => d,
                    _ => wake,
                };
                tokio::time::sleep_until(wake).await;
            }
        }
        report
    }

    /// Augmentación opcional y entrega al observer.
    async fn finish_iteration(&self,
                              k: u32,
                              artifact: ArtifactRef,
                              result: &RunResult,
                              observer: &mut dyn IterationObserver)
                              -> Result<ArtifactRef, CoreEngineError> {
        let artifact = match &self.augment_with {
            Some(name) => {
                let si = result.side_inputs
                               .get(name)
                               .ok_or_else(|| CoreEngineError::PostProcessFailure(format!("side input '{name}' not loaded")))?;
                transform::augment(&artifact, si, "iteration:augment").await?
            }
            None => artifact,
        };
        let output = IterationOutput { run_id: self.run_id,
                                       iteration: k,
                                       artifact };
        observer.deliver(&output).await?;
        self.engine.sink().emit(self.run_id,
                                k,
                                PipelineEventKind::IterationDelivered { artifact: output.artifact
                                                                                         .location()
                                                                                         .display()
                                                                                         .to_string() });
        Ok(output.artifact)
    }
}
