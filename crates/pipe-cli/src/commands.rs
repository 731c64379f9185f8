use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pipe_adapters::{run_entry, Catalog, EntryRun};
use pipe_core::{FailureKind, LogEventSink, PipelineEngine, ProcessStageRunner};
use uuid::Uuid;

use crate::{EXIT_CONFIG, EXIT_STAGE_FAILURE};

pub struct RunArgs {
    pub catalog: PathBuf,
    pub pipeline: String,
    pub iterations: Option<u32>,
    pub delay_secs: Option<u64>,
    pub work_dir: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

fn load_catalog(path: &Path) -> Option<Catalog> {
    match Catalog::load(path) {
        Ok(c) => Some(c),
        Err(e) => {
            eprintln!("[pipeflow] {e}");
            None
        }
    }
}

pub async fn run(args: RunArgs) -> i32 {
    let Some(catalog) = load_catalog(&args.catalog) else {
        return EXIT_CONFIG;
    };
    let Some(entry) = catalog.get(&args.pipeline) else {
        eprintln!("[pipeflow] pipeline '{}' no existe en {}", args.pipeline, args.catalog.display());
        return EXIT_CONFIG;
    };

    let mut policy = entry.iteration.clone();
    if let Some(n) = args.iterations {
        match NonZeroU32::new(n) {
            Some(count) => policy.count = count,
            None => {
                eprintln!("[pipeflow] --iterations debe ser al menos 1");
                return EXIT_CONFIG;
            }
        }
    }
    if let Some(delay) = args.delay_secs {
        policy.delay_secs = delay;
    }

    let work_dir = args.work_dir.unwrap_or_else(|| std::env::temp_dir().join("pipeflow"));
    let engine = PipelineEngine::new(ProcessStageRunner::new(), &work_dir).with_sink(Arc::new(LogEventSink));
    let run = run_entry(&engine, entry, &policy, Uuid::new_v4(), None).await;
    print_summary(&run);

    let Some(artifact) = run.artifact.as_ref().filter(|_| run.is_success()) else {
        return match run.failure() {
            Some(f) if f.error.kind() == FailureKind::ConfigLoadFailure => EXIT_CONFIG,
            _ => EXIT_STAGE_FAILURE,
        };
    };

    if let Some(dest) = &args.output {
        if let Err(e) = tokio::fs::copy(artifact.location(), dest).await {
            eprintln!("[pipeflow] no se pudo copiar {} a {}: {e}", artifact.location().display(), dest.display());
            return 1;
        }
        println!("{}", dest.display());
    } else {
        println!("{}", artifact.location().display());
    }
    0
}

fn print_summary(run: &EntryRun) {
    let report = &run.report;
    eprintln!("run {} ({} iteración(es) solicitadas)", report.run_id, report.requested);
    for result in &report.results {
        for stage in &result.stages {
            let status = match &stage.error {
                None => "ok".to_string(),
                Some(e) => format!("{} ({e})", e.kind()),
            };
            eprintln!("  iter {} · {:<16} exit={:<5} {:>7} ms  {status}",
                      result.iteration,
                      stage.stage_id,
                      stage.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
                      stage.duration_ms());
        }
    }
    if let Some(failure) = run.failure() {
        eprintln!("falló en la iteración {} stage={} kind={}",
                  failure.iteration,
                  failure.stage_id.as_deref().unwrap_or("-"),
                  failure.error.kind());
        if let Some(stage) = run.failed_result().and_then(|r| r.failed_stage()) {
            let excerpt = stage.excerpt();
            if !excerpt.is_empty() {
                eprintln!("--- diagnóstico ---\n{excerpt}");
            }
        }
    } else if let Some(fp) = run.fingerprint() {
        eprintln!("fingerprint {fp}");
    }
}

pub fn list(catalog: &Path) -> i32 {
    let Some(catalog) = load_catalog(catalog) else {
        return EXIT_CONFIG;
    };
    for entry in catalog.entries() {
        let stages: Vec<&str> = entry.pipeline.stages().iter().map(|s| s.id.as_str()).collect();
        println!("{:<20} iteraciones={:<3} stages={}  {}",
                 entry.name(),
                 entry.iteration.count,
                 stages.join(" -> "),
                 entry.description.as_deref().unwrap_or(""));
    }
    0
}

pub fn validate(catalog: &Path) -> i32 {
    let Some(loaded) = load_catalog(catalog) else {
        return EXIT_CONFIG;
    };
    let summary: serde_json::Value = loaded.entries()
                                           .map(|e| (e.name().to_string(), serde_json::json!(e.pipeline.definition_hash())))
                                           .collect::<serde_json::Map<_, _>>()
                                           .into();
    println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());
    eprintln!("catálogo {} válido ({} pipeline(s))", catalog.display(), loaded.len());
    0
}
