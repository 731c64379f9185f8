//! Errores del core.
//!
//! Una variante por cada categoría de fallo observable de un stage o de un
//! run. `FailureKind` es la etiqueta estable que viaja en eventos y en las
//! respuestas HTTP; `CoreEngineError` lleva además el contexto (exit code,
//! mensaje, nombre de artifact).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Taxonomía de fallos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    LaunchFailure,
    NonZeroExit,
    PostProcessFailure,
    Timeout,
    ConfigLoadFailure,
    UpstreamArtifactMissing,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::LaunchFailure => "LaunchFailure",
            FailureKind::NonZeroExit => "NonZeroExit",
            FailureKind::PostProcessFailure => "PostProcessFailure",
            FailureKind::Timeout => "Timeout",
            FailureKind::ConfigLoadFailure => "ConfigLoadFailure",
            FailureKind::UpstreamArtifactMissing => "UpstreamArtifactMissing",
            FailureKind::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum CoreEngineError {
    /// El ejecutable no existe o no pudo lanzarse.
    #[error("launch failure: {0}")]
    LaunchFailure(String),
    /// `code` es `None` cuando el proceso terminó por señal.
    #[error("unexpected exit status {code:?} (expected {expected})")]
    NonZeroExit { code: Option<i32>, expected: i32 },
    #[error("post-process failure: {0}")]
    PostProcessFailure(String),
    #[error("stage timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },
    /// Deadline global del request/run agotado mientras corría un stage.
    #[error("run deadline exceeded")]
    DeadlineExceeded,
    #[error("config load failure: {0}")]
    ConfigLoadFailure(String),
    #[error("upstream artifact missing: {0}")]
    UpstreamArtifactMissing(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl CoreEngineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CoreEngineError::LaunchFailure(_) => FailureKind::LaunchFailure,
            CoreEngineError::NonZeroExit { .. } => FailureKind::NonZeroExit,
            CoreEngineError::PostProcessFailure(_) => FailureKind::PostProcessFailure,
            CoreEngineError::Timeout { .. } | CoreEngineError::DeadlineExceeded => FailureKind::Timeout,
            CoreEngineError::ConfigLoadFailure(_) => FailureKind::ConfigLoadFailure,
            CoreEngineError::UpstreamArtifactMissing(_) => FailureKind::UpstreamArtifactMissing,
            CoreEngineError::Internal(_) => FailureKind::Internal,
        }
    }

    /// Exit code asociado, si el proceso llegó a terminar con uno.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CoreEngineError::NonZeroExit { code, .. } => *code,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_is_reported_as_timeout_kind() {
        assert_eq!(CoreEngineError::DeadlineExceeded.kind(), FailureKind::Timeout);
        assert_eq!(CoreEngineError::Timeout { after_ms: 10 }.kind(), FailureKind::Timeout);
    }

    #[test]
    fn non_zero_exit_exposes_code() {
        let e = CoreEngineError::NonZeroExit { code: Some(1), expected: 0 };
        assert_eq!(e.exit_code(), Some(1));
        assert_eq!(e.kind().as_str(), "NonZeroExit");
        assert_eq!(e.to_string(), "unexpected exit status Some(1) (expected 0)");
    }
}
