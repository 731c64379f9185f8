//! Ejecución de un único stage.
//!
//! `StageRunner` es la costura entre el engine y el mundo externo: recibe un
//! `StageSpec` y el subconjunto de artifacts que el stage declaró como
//! inputs, y devuelve siempre un `StageResult` (los errores viajan dentro del
//! resultado, nunca como pánico). No reintenta: reintentar es una decisión
//! de nivel pipeline.

pub mod process;
pub mod resolve;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::time::Instant;

use crate::event::EventSink;
use crate::model::{ArtifactMap, RunNamespace, SideInput, StageResult, StageSpec};

pub use process::ProcessStageRunner;
pub use resolve::{resolve_stage, ResolvedStage};

/// Contexto de ejecución entregado a `StageRunner::execute`.
pub struct StageContext<'a> {
    pub stage_index: usize,
    pub namespace: &'a RunNamespace,
    pub side_inputs: &'a IndexMap<String, SideInput>,
    pub sink: &'a dyn EventSink,
    /// Deadline global del run; el runner lo combina con el timeout del stage.
    pub deadline: Option<Instant>,
}

#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn execute(&self, spec: &StageSpec, inputs: &ArtifactMap, ctx: &StageContext<'_>) -> StageResult;
}

#[async_trait]
impl<T: StageRunner + ?Sized> StageRunner for std::sync::Arc<T> {
    async fn execute(&self, spec: &StageSpec, inputs: &ArtifactMap, ctx: &StageContext<'_>) -> StageResult {
        (**self).execute(spec, inputs, ctx).await
    }
}
