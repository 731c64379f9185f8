//! Engine: definición validada de pipelines y ejecución lineal de sus
//! stages.

pub mod builder;
pub mod core;

pub use builder::{Pipeline, PipelineBuilder};
pub use core::{PipelineEngine, RunOptions};
