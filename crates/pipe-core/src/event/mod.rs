//! Eventos del pipeline y sinks de observabilidad.

pub mod sink;
pub mod types;

pub use sink::{EventSink, InMemoryEventSink, LogEventSink, NullEventSink};
pub use types::{PipelineEvent, PipelineEventKind};
