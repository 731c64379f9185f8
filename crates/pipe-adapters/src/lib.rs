//! pipe-adapters: piezas concretas alrededor de pipe-core.
//!
//! - `catalog`: catálogo JSON de pipelines estáticos (stages, side inputs,
//!   política de iteración, content type de la respuesta).
//! - `coefficients` + `param_card`: side input de coeficientes aleatorios
//!   que además escribe una copia parcheada del parameter card.
//! - `accumulate`: observer que concatena los CSV de cada iteración.
//! - `execute`: ejecuta una entrada del catálogo según su política.

pub mod accumulate;
pub mod catalog;
pub mod coefficients;
pub mod execute;
pub mod param_card;

pub use accumulate::CsvAccumulator;
pub use catalog::{AccumulatePolicy, Catalog, CatalogEntry, CatalogError, IterationPolicy, PipelineConfig, SideInputConfig};
pub use coefficients::RandomCoefficients;
pub use execute::{run_entry, EntryRun};
pub use param_card::{patch_smeft_block, ParamCardError};
