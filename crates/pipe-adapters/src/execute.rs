//! Ejecución de una entrada del catálogo según su política de iteración.
//!
//! Lo comparten el servidor HTTP y el CLI: un único run cuando la política
//! lo permite, o una secuencia de iteraciones con augmentación y
//! acumulación opcionales. Todo queda bajo `<work_dir>/<run_id>/`.
use std::path::PathBuf;

use pipe_core::{ArtifactRef, DiscardObserver, IterationController, IterationFailure, IterationReport, PipelineEngine, RunOptions,
                RunOutcome, RunResult};
use tokio::time::Instant;
use uuid::Uuid;

use crate::accumulate::CsvAccumulator;
use crate::catalog::{CatalogEntry, IterationPolicy};

#[derive(Debug, Clone)]
pub struct EntryRun {
    pub report: IterationReport,
    /// Artifact a devolver: el combinado si hay acumulación, si no el de la
    /// última iteración. `None` si algo falló.
    pub artifact: Option<ArtifactRef>,
    /// Directorio raíz del run (`<work_dir>/<run_id>`).
    pub run_dir: PathBuf,
}

impl EntryRun {
    pub fn run_id(&self) -> Uuid {
        self.report.run_id
    }

    pub fn is_success(&self) -> bool {
        self.report.is_success() && self.artifact.is_some()
    }

    /// Fingerprint de la última iteración ejecutada.
    pub fn fingerprint(&self) -> Option<&str> {
        self.report.results.last().map(|r| r.fingerprint.as_str())
    }

    pub fn failure(&self) -> Option<&IterationFailure> {
        self.report.failure.as_ref()
    }

    pub fn failed_result(&self) -> Option<&RunResult> {
        self.report.failed_result()
    }

    /// Borra el directorio del run con todas sus iteraciones.
    pub async fn remove_run_dir(&self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.run_dir).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Ejecuta `entry` con `policy` (normalmente `entry.iteration`, o una copia
/// con overrides del operador).
pub async fn run_entry(engine: &PipelineEngine, entry: &CatalogEntry, policy: &IterationPolicy, run_id: Uuid,
                       deadline: Option<Instant>)
                       -> EntryRun {
    let run_dir = engine.work_dir().join(run_id.to_string());

    if policy.is_single_run() {
        let mut opts = RunOptions::new().run_id(run_id);
        opts.deadline = deadline;
        let result = engine.run(&entry.pipeline, opts).await;
        let (artifact, failure) = match result.outcome.clone() {
            RunOutcome::Completed { artifact } => (Some(artifact), None),
            RunOutcome::Failed { stage_id, error } => (None,
                                                       Some(IterationFailure { iteration: result.iteration,
                                                                               stage_id,
                                                                               error })),
        };
        let report = IterationReport { run_id,
                                       requested: 1,
                                       results: vec![result],
                                       delivered: artifact.iter().cloned().collect(),
                                       failure };
        return EntryRun { report,
                          artifact,
                          run_dir };
    }

    let mut controller = IterationController::new(engine).run_id(run_id)
                                                        .count(policy.count)
                                                        .delay(policy.delay())
                                                        .deadline(deadline);
    if let Some(side_input) = &policy.augment_with {
        controller = controller.augment_with(side_input.clone());
    }

    match &policy.accumulate {
        Some(acc) => {
            let mut accumulator = CsvAccumulator::new(entry.pipeline.final_output_name().unwrap_or(entry.name()), run_dir.join(&acc.file_name))
                .with_skip_lines(acc.skip_lines);
            let report = controller.run(&entry.pipeline, &mut accumulator).await;
            let artifact = if report.is_success() { accumulator.artifact() } else { None };
            EntryRun { report,
                       artifact,
                       run_dir }
        }
        None => {
            let report = controller.run(&entry.pipeline, &mut DiscardObserver).await;
            let artifact = if report.is_success() { report.last_artifact().cloned() } else { None };
            EntryRun { report,
                       artifact,
                       run_dir }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::num::NonZeroU32;

    use pipe_core::ProcessStageRunner;

    use super::*;
    use crate::catalog::Catalog;

    const CATALOG: &str = r#"{ "pipelines": {
      "rows": {
        "content_type": "text/csv",
        "stages": [
          { "id": "emit", "program": "/bin/sh", "args": ["-c", "printf 'k,v\n${iteration},1\n' > \"$1\"", "sh", "${out}"],
            "output": { "name": "rows", "path": "rows.csv" } }
        ],
        "iteration": { "count": 3, "accumulate": {} }
      },
      "fails": {
        "stages": [
          { "id": "bad", "program": "/bin/sh", "args": ["-c", "exit 2"], "output": { "name": "x", "path": "x" } }
        ]
      }
    } }"#;

    #[tokio::test]
    async fn accumulated_sequence_returns_combined_file() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::from_json_str(CATALOG, dir.path()).unwrap();
        let entry = catalog.get("rows").unwrap();
        let engine = PipelineEngine::new(ProcessStageRunner::new(), dir.path());

        let run = run_entry(&engine, entry, &entry.iteration, Uuid::new_v4(), None).await;

        assert!(run.is_success(), "{:?}", run.failure());
        let artifact = run.artifact.as_ref().unwrap();
        assert_eq!(artifact.location(), run.run_dir.join("combined.csv"));
        assert_eq!(std::fs::read_to_string(artifact.location()).unwrap(), "k,v\n1,1\n2,1\n3,1\n");
        assert_eq!(run.report.delivered.len(), 3);
    }

    #[tokio::test]
    async fn single_run_policy_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::from_json_str(CATALOG, dir.path()).unwrap();
        let entry = catalog.get("fails").unwrap();
        let engine = PipelineEngine::new(ProcessStageRunner::new(), dir.path());

        let run = run_entry(&engine, entry, &entry.iteration, Uuid::new_v4(), None).await;

        assert!(!run.is_success());
        assert!(run.artifact.is_none());
        let failure = run.failure().unwrap();
        assert_eq!(failure.stage_id.as_deref(), Some("bad"));
        assert_eq!(failure.iteration, 1);
        assert_eq!(run.failed_result().unwrap().failed_stage().unwrap().exit_code, Some(2));
    }

    #[tokio::test]
    async fn overridden_count_without_accumulation_returns_last_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::from_json_str(CATALOG, dir.path()).unwrap();
        let entry = catalog.get("rows").unwrap();
        let engine = PipelineEngine::new(ProcessStageRunner::new(), dir.path());
        let mut policy = entry.iteration.clone();
        policy.count = NonZeroU32::new(2).unwrap();
        policy.accumulate = None;

        let run = run_entry(&engine, entry, &policy, Uuid::new_v4(), None).await;

        let artifact = run.artifact.as_ref().unwrap();
        assert!(artifact.location().ends_with("iter-2/rows.csv"));
        assert_eq!(run.fingerprint().map(str::len), Some(64));
    }
}
