//! Catálogo estático de pipelines.
//!
//! Un archivo JSON con la forma
//!
//! ```json
//! { "pipelines": { "<nombre>": {
//!     "description": "...",
//!     "content_type": "text/csv",
//!     "side_inputs": [ { "kind": "random_coefficients", "name": "coefficients" } ],
//!     "stages": [ { "id": "...", "program": "...", "args": ["${out}"], "output": {...} } ],
//!     "iteration": { "count": 1, "delay_secs": 0 }
//! } } }
//! ```
//!
//! Las rutas relativas de side inputs, parameter cards y programas que
//! contienen `/` se resuelven contra el directorio del catálogo. Cada
//! entrada se valida construyendo su `Pipeline` al cargar.
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pipe_core::{CoreEngineError, FileSideInput, Pipeline, SideInputProvider, StageSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::accumulate::DEFAULT_SKIP_LINES;
use crate::coefficients::{RandomCoefficients, DEFAULT_COUNT, DEFAULT_MAX, DEFAULT_MIN};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
pub const DEFAULT_ACCUMULATED_FILE: &str = "combined.csv";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot read catalog {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("malformed catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("pipeline '{name}': {source}")]
    Pipeline { name: String, source: CoreEngineError },
    #[error("pipeline '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

impl From<CatalogError> for CoreEngineError {
    fn from(e: CatalogError) -> Self {
        CoreEngineError::ConfigLoadFailure(e.to_string())
    }
}

fn default_count() -> usize {
    DEFAULT_COUNT
}
fn default_min() -> f64 {
    DEFAULT_MIN
}
fn default_max() -> f64 {
    DEFAULT_MAX
}
fn default_skip_lines() -> usize {
    DEFAULT_SKIP_LINES
}
fn default_accumulated_file() -> String {
    DEFAULT_ACCUMULATED_FILE.to_string()
}
fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}
fn one() -> NonZeroU32 {
    NonZeroU32::MIN
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideInputConfig {
    File {
        name: String,
        path: PathBuf,
    },
    RandomCoefficients {
        name: String,
        #[serde(default = "default_count")]
        count: usize,
        #[serde(default = "default_min")]
        min: f64,
        #[serde(default = "default_max")]
        max: f64,
        #[serde(default)]
        seed: Option<u64>,
        #[serde(default)]
        param_card: Option<PathBuf>,
    },
}

impl SideInputConfig {
    pub fn name(&self) -> &str {
        match self {
            SideInputConfig::File { name, .. } | SideInputConfig::RandomCoefficients { name, .. } => name,
        }
    }

    fn into_provider(self, base: &Path) -> Result<Arc<dyn SideInputProvider>, CoreEngineError> {
        let provider: Arc<dyn SideInputProvider> = match self {
            SideInputConfig::File { name, path } => Arc::new(FileSideInput::new(name, resolve_path(base, &path))),
            SideInputConfig::RandomCoefficients { name, count, min, max, seed, param_card } => {
                let mut provider = RandomCoefficients::new(name).with_count(count).with_range(min, max).with_seed(seed);
                if let Some(card) = param_card {
                    provider = provider.with_param_card(resolve_path(base, &card));
                }
                provider.validate()?;
                Arc::new(provider)
            }
        };
        Ok(provider)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatePolicy {
    #[serde(default = "default_skip_lines")]
    pub skip_lines: usize,
    /// Nombre del archivo combinado dentro del directorio del run.
    #[serde(default = "default_accumulated_file")]
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationPolicy {
    #[serde(default = "one")]
    pub count: NonZeroU32,
    #[serde(default)]
    pub delay_secs: u64,
    /// Side input antepuesto al artifact final de cada iteración.
    #[serde(default)]
    pub augment_with: Option<String>,
    #[serde(default)]
    pub accumulate: Option<AccumulatePolicy>,
}

impl Default for IterationPolicy {
    fn default() -> Self {
        Self { count: one(),
               delay_secs: 0,
               augment_with: None,
               accumulate: None }
    }
}

impl IterationPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    /// Con una sola iteración y sin augmentación ni acumulación basta un run.
    pub fn is_single_run(&self) -> bool {
        self.count.get() == 1 && self.augment_with.is_none() && self.accumulate.is_none()
    }
}

/// Entrada tal como aparece en el JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub side_inputs: Vec<SideInputConfig>,
    pub stages: Vec<StageSpec>,
    #[serde(default)]
    pub iteration: IterationPolicy,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    pipelines: BTreeMap<String, PipelineConfig>,
}

/// Pipeline del catálogo ya validado.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub pipeline: Pipeline,
    pub description: Option<String>,
    pub content_type: String,
    pub iteration: IterationPolicy,
}

impl CatalogEntry {
    pub fn name(&self) -> &str {
        self.pipeline.name()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
    source: Option<PathBuf>,
}

impl Catalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io { path: path.to_path_buf(),
                                                                                  source })?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut catalog = Self::from_json_str(&raw, &base)?;
        catalog.source = Some(path.to_path_buf());
        log::info!("catalog {} loaded: {} pipeline(s)", path.display(), catalog.len());
        Ok(catalog)
    }

    /// `base` es el directorio contra el que se resuelven rutas relativas.
    pub fn from_json_str(raw: &str, base: &Path) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        let mut entries = BTreeMap::new();
        for (name, config) in file.pipelines {
            let entry = build_entry(&name, config, base)?;
            entries.insert(name, entry);
        }
        Ok(Self { entries, source: None })
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

fn resolve_path(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

fn build_entry(name: &str, config: PipelineConfig, base: &Path) -> Result<CatalogEntry, CatalogError> {
    let invalid = |reason: String| CatalogError::Invalid { name: name.to_string(),
                                                           reason };
    let as_pipeline_error = |source: CoreEngineError| CatalogError::Pipeline { name: name.to_string(),
                                                                               source };

    let PipelineConfig { description,
                         content_type,
                         side_inputs,
                         stages,
                         iteration } = config;

    if let Some(si) = &iteration.augment_with {
        if !side_inputs.iter().any(|c| c.name() == si) {
            return Err(invalid(format!("iteration.augment_with names unknown side input '{si}'")));
        }
    }
    if let Some(acc) = &iteration.accumulate {
        if acc.file_name.is_empty() || Path::new(&acc.file_name).components().count() != 1 {
            return Err(invalid(format!("accumulate.file_name must be a plain file name, got '{}'", acc.file_name)));
        }
    }
    if !is_valid_content_type(&content_type) {
        return Err(invalid(format!("invalid content_type '{content_type}'")));
    }

    let mut builder = Pipeline::builder(name);
    for si in side_inputs {
        builder = builder.side_input(si.into_provider(base).map_err(as_pipeline_error)?);
    }
    for mut stage in stages {
        if !Path::new(&stage.program).is_absolute() && stage.program.contains('/') && !stage.program.contains("${") {
            stage.program = base.join(&stage.program).display().to_string();
        }
        builder = builder.stage(stage);
    }
    let pipeline = builder.build().map_err(as_pipeline_error)?;

    Ok(CatalogEntry { pipeline,
                      description,
                      content_type,
                      iteration })
}

/// Validación mínima de `type/subtype[; params]` para el header Content-Type.
fn is_valid_content_type(s: &str) -> bool {
    if s.contains(['\r', '\n']) {
        return false;
    }
    let essence = s.split(';').next().unwrap_or_default().trim();
    matches!(essence.split_once('/'), Some((t, st)) if !t.is_empty() && !st.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
      "pipelines": {
        "generate": {
          "description": "madgraph -> pythia",
          "content_type": "text/csv",
          "side_inputs": [
            { "kind": "random_coefficients", "name": "coefficients", "seed": 3, "param_card": "cards/param_card.dat" }
          ],
          "stages": [
            { "id": "madgraph", "program": "bin/mg5", "args": ["${coefficients_card}", "${out}"],
              "inputs": ["coefficients_card"],
              "output": { "name": "events", "path": "Events/events.lhe.gz" },
              "transform": { "kind": "decompress" } },
            { "id": "pythia", "program": "/opt/pythia/pgen", "args": ["${events}", "${out}"],
              "inputs": ["events"], "output": { "name": "particles", "path": "particles.csv" },
              "timeout_ms": 60000 }
          ],
          "iteration": { "count": 3, "delay_secs": 1, "augment_with": "coefficients",
                         "accumulate": { "skip_lines": 3 } }
        },
        "single": {
          "stages": [ { "id": "a", "program": "sh", "args": ["-c", "echo hi > $1", "sh", "${out}"],
                        "output": { "name": "x", "path": "x.txt" } } ]
        }
      }
    }"#;

    #[test]
    fn loads_entries_with_defaults() {
        let catalog = Catalog::from_json_str(CATALOG, Path::new("/srv/pipeflow")).unwrap();
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["generate", "single"]);

        let generate = catalog.get("generate").unwrap();
        assert_eq!(generate.content_type, "text/csv");
        assert_eq!(generate.iteration.count.get(), 3);
        assert_eq!(generate.iteration.delay(), Duration::from_secs(1));
        assert_eq!(generate.iteration.accumulate.as_ref().unwrap().file_name, DEFAULT_ACCUMULATED_FILE);
        assert_eq!(generate.pipeline.stages()[0].program, "/srv/pipeflow/bin/mg5");
        assert_eq!(generate.pipeline.stages()[1].program, "/opt/pythia/pgen");
        assert!(generate.pipeline.has_side_input("coefficients"));

        let single = catalog.get("single").unwrap();
        assert_eq!(single.content_type, DEFAULT_CONTENT_TYPE);
        assert!(single.iteration.is_single_run());
        assert_eq!(single.pipeline.stages()[0].program, "sh");
    }

    #[test]
    fn zero_iterations_is_rejected() {
        let raw = r#"{"pipelines": {"p": {"stages": [{"id": "a", "program": "true", "output": {"name": "x", "path": "x"}}],
                      "iteration": {"count": 0}}}}"#;
        assert!(matches!(Catalog::from_json_str(raw, Path::new("/")), Err(CatalogError::Parse(_))));
    }

    #[test]
    fn invalid_pipeline_maps_to_config_load_failure() {
        let raw = r#"{"pipelines": {"p": {"stages": [{"id": "a", "program": "true", "inputs": ["ghost"],
                                                      "output": {"name": "x", "path": "x"}}]}}}"#;
        let err = Catalog::from_json_str(raw, Path::new("/")).unwrap_err();
        assert!(matches!(err, CatalogError::Pipeline { .. }));
        let core: CoreEngineError = err.into();
        assert!(matches!(core, CoreEngineError::ConfigLoadFailure(m) if m.contains("ghost")));
    }

    #[test]
    fn augment_with_must_name_a_side_input() {
        let raw = r#"{"pipelines": {"p": {"stages": [{"id": "a", "program": "true", "output": {"name": "x", "path": "x"}}],
                      "iteration": {"augment_with": "coefficients"}}}}"#;
        assert!(matches!(Catalog::from_json_str(raw, Path::new("/")), Err(CatalogError::Invalid { .. })));
    }

    #[test]
    fn bad_content_type_is_rejected() {
        let raw = r#"{"pipelines": {"p": {"content_type": "csv", "stages": [{"id": "a", "program": "true",
                      "output": {"name": "x", "path": "x"}}]}}}"#;
        assert!(matches!(Catalog::from_json_str(raw, Path::new("/")), Err(CatalogError::Invalid { .. })));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(Catalog::load("/nonexistent/pipelines.json"), Err(CatalogError::Io { .. })));
    }
}
