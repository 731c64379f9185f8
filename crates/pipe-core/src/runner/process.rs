//! `StageRunner` que lanza el stage como proceso hijo.
//!
//! - stdout y stderr se leen en tareas propias, línea a línea, y llegan por
//!   un canal acotado al bucle principal, que las reenvía al sink y las
//!   guarda en un `DiagnosticBuffer` con tope de bytes.
//! - El bucle principal espera a la vez la salida del proceso y el límite de
//!   tiempo (timeout del stage o deadline del run, el que llegue antes).
//! - En Unix el hijo se lanza en su propio grupo de procesos; al vencer el
//!   límite se mata el grupo completo con SIGKILL.
//! - Si el future de `execute` se descarta a mitad (cliente desconectado,
//!   run abortado) un `GroupGuard` mata igualmente el grupo completo.
//! - Tras la salida del proceso el drenaje de diagnósticos tiene un margen
//!   acotado: un nieto que mantenga abiertos los pipes no bloquea el stage.
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{resolve_stage, StageContext, StageRunner};
use crate::constants::{DEFAULT_DIAGNOSTIC_CAP_BYTES, DIAGNOSTIC_CHANNEL_CAPACITY};
use crate::errors::CoreEngineError;
use crate::event::PipelineEventKind;
use crate::model::{ArtifactMap, ArtifactRef, DiagnosticBuffer, DiagnosticStream, StageResult, StageSpec};
use crate::transform;

/// Longitud máxima de una línea leída de un pipe; el resto llega como otra
/// línea.
const MAX_LINE_BYTES: u64 = 16 * 1024;

/// Margen para drenar diagnósticos pendientes una vez terminado el proceso.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ProcessStageRunner {
    diagnostic_cap: usize,
    default_timeout: Option<Duration>,
}

impl Default for ProcessStageRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Cómo terminó la espera del proceso.
enum Termination {
    Exited(std::io::Result<std::process::ExitStatus>),
    Killed(CoreEngineError),
}

impl ProcessStageRunner {
    pub fn new() -> Self {
        Self { diagnostic_cap: DEFAULT_DIAGNOSTIC_CAP_BYTES,
               default_timeout: None }
    }

    pub fn with_diagnostic_cap(mut self, cap: usize) -> Self {
        self.diagnostic_cap = cap;
        self
    }

    /// Timeout aplicado a los stages que no declaran uno propio.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Límite efectivo y el error que produce alcanzarlo.
    fn limit_for(&self, spec: &StageSpec, deadline: Option<Instant>) -> Option<(Instant, CoreEngineError)> {
        let now = Instant::now();
        let stage = spec.timeout_duration()
                        .or(self.default_timeout)
                        .map(|t| (now + t, CoreEngineError::Timeout { after_ms: t.as_millis() as u64 }));
        match (stage, deadline) {
            (Some((at, err)), Some(d)) if at <= d => Some((at, err)),
            (_, Some(d)) => Some((d, CoreEngineError::DeadlineExceeded)),
            (stage, None) => stage,
        }
    }
}

fn spawn_reader<R>(reader: R, stream: DiagnosticStream, tx: mpsc::Sender<(DiagnosticStream, String)>) -> JoinHandle<()>
    where R: AsyncRead + Unpin + Send + 'static
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match (&mut reader).take(MAX_LINE_BYTES).read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end_matches(['\n', '\r']).to_string();
                    if tx.send((stream, line)).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// SIGKILL al grupo `pgid`. El hijo se lanzó con process_group(0): su pgid
/// es su pid.
#[cfg(unix)]
fn kill_group(pgid: u32) {
    unsafe {
        libc::kill(-(pgid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Mata el grupo de procesos del hijo (o sólo el hijo fuera de Unix).
fn kill_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        kill_group(pid);
    }
    let _ = child.start_kill();
}

/// Mata el grupo del hijo al soltarse, salvo que se haya desarmado tras
/// esperar al proceso. `kill_on_drop` sólo alcanza al hijo directo.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            log::debug!("stage dropped while running; killing process group {pgid}");
            kill_group(pgid);
        }
    }
}

async fn verify_output(spec: &StageSpec, output: Option<&Path>) -> Result<Option<ArtifactRef>, CoreEngineError> {
    let (Some(decl), Some(path)) = (spec.output.as_ref(), output) else {
        return Ok(None);
    };
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => Ok(Some(ArtifactRef::new(decl.name.clone(), path, spec.id.clone()))),
        _ => Err(CoreEngineError::PostProcessFailure(format!("stage '{}' did not produce declared output '{}' at {}",
                                                             spec.id,
                                                             decl.name,
                                                             path.display()))),
    }
}

#[async_trait]
impl StageRunner for ProcessStageRunner {
    async fn execute(&self, spec: &StageSpec, inputs: &ArtifactMap, ctx: &StageContext<'_>) -> StageResult {
        let run_id = ctx.namespace.run_id();
        let iteration = ctx.namespace.iteration();
        let started_at = Utc::now();

        let resolved = match resolve_stage(spec, inputs, ctx.namespace) {
            Ok(r) => r,
            Err(e) => return StageResult::failed_before_launch(spec.id.clone(), e),
        };
        if let Some(parent) = resolved.output.as_ref().and_then(|p| p.parent()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return StageResult::failed_before_launch(spec.id.clone(),
                                                         CoreEngineError::Internal(format!("cannot create {}: {e}", parent.display())));
            }
        }
        if resolved.working_dir.starts_with(ctx.namespace.dir()) {
            if let Err(e) = tokio::fs::create_dir_all(&resolved.working_dir).await {
                return StageResult::failed_before_launch(spec.id.clone(),
                                                         CoreEngineError::Internal(format!("cannot create working dir {}: {e}",
                                                                                           resolved.working_dir.display())));
            }
        }

        ctx.sink.emit(run_id,
                      iteration,
                      PipelineEventKind::StageStarted { stage_index: ctx.stage_index,
                                                        stage_id: spec.id.clone(),
                                                        program: resolved.program.clone(),
                                                        args: resolved.args.clone() });

        let mut cmd = Command::new(&resolved.program);
        cmd.args(&resolved.args)
           .current_dir(&resolved.working_dir)
           .envs(&spec.env)
           .stdin(Stdio::null())
           .stdout(Stdio::piped())
           .stderr(Stdio::piped())
           .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                let err = CoreEngineError::LaunchFailure(format!("{}: {e}", resolved.program));
                return StageResult::failed_before_launch(spec.id.clone(), err);
            }
        };
        let mut group = GroupGuard::new(&child);

        let (tx, mut rx) = mpsc::channel(DIAGNOSTIC_CHANNEL_CAPACITY);
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, DiagnosticStream::Stdout, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, DiagnosticStream::Stderr, tx.clone()));
        }
        drop(tx);

        let mut buffer = DiagnosticBuffer::new(self.diagnostic_cap);
        let mut record = |stream: DiagnosticStream, line: String| {
            ctx.sink.emit(run_id,
                          iteration,
                          PipelineEventKind::StageOutput { stage_index: ctx.stage_index,
                                                           stage_id: spec.id.clone(),
                                                           stream,
                                                           line: line.clone() });
            buffer.push(stream, line);
        };

        let limit = self.limit_for(spec, ctx.deadline);
        let limit_at = limit.as_ref().map(|(at, _)| *at);
        let sleep = async move {
            match limit_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(sleep);

        let termination = loop {
            tokio::select! {
                biased;
                Some((stream, line)) = rx.recv() => record(stream, line),
                status = child.wait() => break Termination::Exited(status),
                _ = &mut sleep => {
                    kill_tree(&mut child);
                    let err = limit.as_ref().map(|(_, e)| e.clone()).unwrap_or(CoreEngineError::DeadlineExceeded);
                    break Termination::Killed(err);
                }
            }
        };
        if matches!(termination, Termination::Killed(_)) {
            let _ = child.wait().await;
        }
        group.disarm();

        // Drenaje acotado de lo que quede en los pipes.
        let _ = tokio::time::timeout(DRAIN_GRACE, async {
                    while let Some((stream, line)) = rx.recv().await {
                        record(stream, line);
                    }
                }).await;
        for r in readers {
            r.abort();
        }

        let dropped = buffer.dropped();
        let mut result = StageResult { stage_id: spec.id.clone(),
                                       exit_code: None,
                                       diagnostics: buffer.into_lines(),
                                       diagnostics_dropped: dropped,
                                       artifact: None,
                                       error: None,
                                       started_at,
                                       finished_at: Utc::now() };

        let status = match termination {
            Termination::Killed(err) => {
                result.error = Some(err);
                return result;
            }
            Termination::Exited(Err(e)) => {
                result.error = Some(CoreEngineError::Internal(format!("wait failed: {e}")));
                return result;
            }
            Termination::Exited(Ok(status)) => status,
        };
        result.exit_code = status.code();
        if status.code() != Some(spec.success_code) {
            result.error = Some(CoreEngineError::NonZeroExit { code: status.code(),
                                                               expected: spec.success_code });
            return result;
        }

        let produced = match verify_output(spec, resolved.output.as_deref()).await {
            Ok(p) => p,
            Err(e) => {
                result.error = Some(e);
                return result;
            }
        };
        result.artifact = match produced {
            Some(artifact) => match transform::apply(&spec.transform, &artifact, &spec.id, ctx.side_inputs).await {
                Ok(a) => Some(a),
                Err(e) => {
                    result.error = Some(e);
                    None
                }
            },
            None => None,
        };
        result.finished_at = Utc::now();
        result
    }
}
