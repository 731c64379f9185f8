#![cfg(unix)]

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flate2::write::GzEncoder;
use flate2::Compression;
use pipe_core::model::DiagnosticStream;
use pipe_core::{CoreEngineError, FailureKind, InMemoryEventSink, OutputTransform, Pipeline, PipelineEngine, PipelineEventKind,
                ProcessStageRunner, RunOptions, StageSpec};

fn sh(id: &str, script: &str) -> StageSpec {
    StageSpec::new(id, "/bin/sh").args(["-c", script, "sh"])
}

#[tokio::test]
async fn two_stage_chain_produces_ab() {
    let dir = tempfile::tempdir().unwrap();
    let engine = PipelineEngine::new(ProcessStageRunner::new(), dir.path());
    let pipeline = Pipeline::builder("ab").stage(sh("A", r#"printf a > "$1""#).arg("${out}").output("fileX", "fileX"))
                                          .stage(sh("B", r#"cat "$1" > "$2" && printf b >> "$2""#).args(["${fileX}", "${out}"])
                                                                                                   .input("fileX")
                                                                                                   .output("fileY", "fileY"))
                                          .build()
                                          .unwrap();

    let result = engine.run(&pipeline, RunOptions::new()).await;

    assert!(result.is_success(), "{:?}", result.error());
    let artifact = result.final_artifact().unwrap();
    assert_eq!(artifact.read_bytes().await.unwrap(), b"ab");
    assert_eq!(result.stages.iter().map(|s| s.exit_code).collect::<Vec<_>>(), vec![Some(0), Some(0)]);
    // el input de B sigue intacto
    assert_eq!(std::fs::read(result.stages[0].artifact.as_ref().unwrap().location()).unwrap(), b"a");
}

#[tokio::test]
async fn non_zero_exit_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let engine = PipelineEngine::new(ProcessStageRunner::new(), dir.path());
    let pipeline = Pipeline::builder("fail").stage(sh("A", "echo boom >&2; exit 1").output("x", "x"))
                                            .stage(sh("B", "touch never").input("x").output("y", "y"))
                                            .build()
                                            .unwrap();

    let result = engine.run(&pipeline, RunOptions::new()).await;

    assert_eq!(result.stages.len(), 1);
    let a = &result.stages[0];
    assert_eq!(a.exit_code, Some(1));
    assert!(a.artifact.is_none());
    assert_eq!(a.error, Some(CoreEngineError::NonZeroExit { code: Some(1), expected: 0 }));
    assert!(a.diagnostics.iter().any(|l| l.stream == DiagnosticStream::Stderr && l.line == "boom"));
    assert!(a.excerpt().contains("[stderr] boom"));
    assert!(result.final_artifact().is_none());
}

#[tokio::test]
async fn custom_success_code_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let engine = PipelineEngine::new(ProcessStageRunner::new(), dir.path());
    let pipeline = Pipeline::builder("code3").stage(sh("A", r#"echo ok > "$1"; exit 3"#).arg("${out}")
                                                                                       .output("x", "out/x.txt")
                                                                                       .success_code(3))
                                             .build()
                                             .unwrap();

    let result = engine.run(&pipeline, RunOptions::new()).await;

    assert!(result.is_success(), "{:?}", result.error());
    assert_eq!(result.stages[0].exit_code, Some(3));
}

/// Vivo y no zombie según `/proc/<pid>/stat`.
#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat.rsplit(')')
                        .next()
                        .map(|rest| !rest.trim_start().starts_with(['Z', 'X']))
                        .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
async fn wait_until_dead(pid: u32) -> bool {
    for _ in 0..100 {
        if !process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[cfg(target_os = "linux")]
async fn read_pid(path: &std::path::Path) -> u32 {
    for _ in 0..200 {
        if let Ok(raw) = std::fs::read_to_string(path) {
            if let Ok(pid) = raw.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no pid written to {}", path.display());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn stage_timeout_kills_process_tree() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("bg.pid");
    let engine = PipelineEngine::new(ProcessStageRunner::new(), dir.path());
    let pipeline = Pipeline::builder("slow").stage(sh("A", r#"sleep 10 & echo $! > "$1"; sleep 10"#).arg(pid_file.display().to_string())
                                                                                                    .output("x", "x")
                                                                                                    .timeout(Duration::from_secs(1)))
                                            .stage(sh("B", "touch never").input("x").output("y", "y"))
                                            .build()
                                            .unwrap();

    let started = Instant::now();
    let result = engine.run(&pipeline, RunOptions::new()).await;
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");
    assert_eq!(result.stage_ids(), vec!["A"]);
    assert_eq!(result.error(), Some(&CoreEngineError::Timeout { after_ms: 1000 }));
    assert_eq!(result.stages[0].exit_code, None);

    let background = read_pid(&pid_file).await;
    assert!(wait_until_dead(background).await, "background pid {background} survived the timeout");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn dropping_a_running_stage_kills_its_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("bg.pid");
    let engine = Arc::new(PipelineEngine::new(ProcessStageRunner::new(), dir.path()));
    let pipeline = Pipeline::builder("orphan").stage(sh("A", r#"sleep 30 & echo $! > "$1"; sleep 30"#).arg(pid_file.display().to_string())
                                                                                                      .output("x", "x"))
                                              .build()
                                              .unwrap();

    let task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(&pipeline, RunOptions::new()).await })
    };
    let background = read_pid(&pid_file).await;
    assert!(process_alive(background));

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert!(wait_until_dead(background).await, "background pid {background} survived the drop");
}

#[tokio::test]
async fn unusable_working_dir_fails_before_launch() {
    let dir = tempfile::tempdir().unwrap();
    let engine = PipelineEngine::new(ProcessStageRunner::new(), dir.path());
    let pipeline = Pipeline::builder("wd").stage(sh("A", r#"printf x > "$1""#).arg("${out}").output("blocker", "blocker"))
                                          .stage(sh("B", "true").working_dir("blocker/sub").output("y", "y"))
                                          .build()
                                          .unwrap();

    let result = engine.run(&pipeline, RunOptions::new()).await;

    assert_eq!(result.stage_ids(), vec!["A", "B"]);
    let b = &result.stages[1];
    assert_eq!(b.exit_code, None);
    match b.error.as_ref().unwrap() {
        CoreEngineError::Internal(msg) => assert!(msg.contains("working dir"), "{msg}"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn run_deadline_aborts_running_stage() {
    let dir = tempfile::tempdir().unwrap();
    let engine = PipelineEngine::new(ProcessStageRunner::new(), dir.path());
    let pipeline = Pipeline::builder("slow").stage(sh("A", "sleep 10").output("x", "x")).build().unwrap();

    let started = Instant::now();
    let result = engine.run(&pipeline, RunOptions::new().timeout(Duration::from_millis(500))).await;

    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(result.error(), Some(&CoreEngineError::DeadlineExceeded));
    assert_eq!(result.error().unwrap().kind(), FailureKind::Timeout);
}

#[tokio::test]
async fn missing_executable_is_launch_failure() {
    let dir = tempfile::tempdir().unwrap();
    let engine = PipelineEngine::new(ProcessStageRunner::new(), dir.path());
    let pipeline = Pipeline::builder("nolaunch").stage(StageSpec::new("A", "/nonexistent/pipeflow-binary").output("x", "x"))
                                                .build()
                                                .unwrap();

    let result = engine.run(&pipeline, RunOptions::new()).await;

    let a = &result.stages[0];
    assert_eq!(a.exit_code, None);
    assert_eq!(a.error.as_ref().unwrap().kind(), FailureKind::LaunchFailure);
}

#[tokio::test]
async fn missing_declared_output_is_post_process_failure() {
    let dir = tempfile::tempdir().unwrap();
    let engine = PipelineEngine::new(ProcessStageRunner::new(), dir.path());
    let pipeline = Pipeline::builder("noout").stage(sh("A", "true").output("x", "x.csv")).build().unwrap();

    let result = engine.run(&pipeline, RunOptions::new()).await;

    assert_eq!(result.stages[0].exit_code, Some(0));
    assert_eq!(result.error().unwrap().kind(), FailureKind::PostProcessFailure);
}

#[tokio::test]
async fn diagnostics_are_capped_and_streamed() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(InMemoryEventSink::new());
    let engine = PipelineEngine::new(ProcessStageRunner::new().with_diagnostic_cap(1024), dir.path()).with_sink(sink.clone());
    let script = r#"i=0; while [ $i -lt 500 ]; do echo line-$i; i=$((i+1)); done; echo done > "$1""#;
    let pipeline = Pipeline::builder("chatty").stage(sh("A", script).arg("${out}").output("x", "x")).build().unwrap();
    let opts = RunOptions::new();
    let run_id = opts.run_id;

    let result = engine.run(&pipeline, opts).await;

    assert!(result.is_success());
    let a = &result.stages[0];
    let retained: usize = a.diagnostics.iter().map(|l| l.line.len()).sum();
    assert!(retained <= 1024);
    assert!(a.diagnostics_dropped > 0);
    assert_eq!(a.diagnostics.last().unwrap().line, "line-499");

    let streamed = sink.list(run_id)
                       .into_iter()
                       .filter(|e| matches!(e.kind, PipelineEventKind::StageOutput { .. }))
                       .count();
    assert_eq!(streamed, 500);
}

#[tokio::test]
async fn decompress_transform_yields_new_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("events.lhe.gz");
    let mut enc = GzEncoder::new(std::fs::File::create(&source).unwrap(), Compression::default());
    enc.write_all(b"<event/>\n").unwrap();
    enc.finish().unwrap();

    let engine = PipelineEngine::new(ProcessStageRunner::new(), dir.path().join("work"));
    let pipeline = Pipeline::builder("gen").stage(sh("madgraph", r#"cp "$1" "$2""#).args([source.display().to_string(),
                                                                                          "${out}".to_string()])
                                                                                 .output("events", "Events/events.lhe.gz")
                                                                                 .transform(OutputTransform::Decompress))
                                           .build()
                                           .unwrap();

    let result = engine.run(&pipeline, RunOptions::new()).await;

    let artifact = result.final_artifact().unwrap();
    assert!(artifact.location().ends_with("Events/events.lhe"));
    assert_eq!(artifact.read_bytes().await.unwrap(), b"<event/>\n");
    assert!(artifact.location().with_extension("lhe.gz").exists());
}
