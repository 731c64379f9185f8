//! Modelos neutrales (ArtifactRef, StageSpec, resultados, side inputs,
//! namespace).

pub mod artifact;
pub mod diagnostics;
pub mod namespace;
pub mod result;
pub mod side_input;
pub mod stage;

pub use artifact::ArtifactRef;
pub use diagnostics::{DiagnosticBuffer, DiagnosticLine, DiagnosticStream};
pub use namespace::RunNamespace;
pub use result::{RunOutcome, RunResult, StageResult};
pub use side_input::{FileSideInput, ProvidedSideInput, SideInput, SideInputProvider, SideValue};
pub use stage::{OutputDecl, OutputTransform, StageSpec};

/// Mapa de artifacts disponibles en un run, en orden de producción.
pub type ArtifactMap = indexmap::IndexMap<String, ArtifactRef>;
