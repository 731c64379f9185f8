//! pipe-core: motor lineal de pipelines de procesos externos.
pub mod constants;
pub mod engine;
pub mod errors;
pub mod event;
pub mod hashing;
pub mod iteration;
pub mod model;
pub mod runner;
pub mod template;
pub mod transform;

pub use engine::{Pipeline, PipelineBuilder, PipelineEngine, RunOptions};
pub use errors::{CoreEngineError, FailureKind};
pub use event::{EventSink, InMemoryEventSink, LogEventSink, NullEventSink, PipelineEvent, PipelineEventKind};
pub use iteration::{DiscardObserver, FnObserver, IterationController, IterationFailure, IterationObserver, IterationOutput,
                    IterationReport};
pub use model::{ArtifactMap, ArtifactRef, FileSideInput, OutputTransform, ProvidedSideInput, RunNamespace, RunOutcome, RunResult,
                SideInput, SideInputProvider, SideValue, StageResult, StageSpec};
pub use runner::{ProcessStageRunner, StageContext, StageRunner};
