//! Resolución de plantillas de un stage contra el namespace del run.
use std::path::PathBuf;

use crate::errors::CoreEngineError;
use crate::model::{ArtifactMap, RunNamespace, StageSpec};
use crate::template::{self, ITERATION, OUT, RUN_DIR, RUN_ID};

/// Programa, argumentos y rutas ya resueltos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStage {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub output: Option<PathBuf>,
}

pub fn resolve_stage(spec: &StageSpec, inputs: &ArtifactMap, ns: &RunNamespace) -> Result<ResolvedStage, CoreEngineError> {
    let base_lookup = |name: &str| -> Option<String> {
        match name {
            RUN_DIR => Some(ns.dir().display().to_string()),
            RUN_ID => Some(ns.run_id().to_string()),
            ITERATION => Some(ns.iteration().to_string()),
            _ => inputs.get(name).map(|a| a.location().display().to_string()),
        }
    };

    // La salida se resuelve primero: `${out}` depende de ella.
    let output = match &spec.output {
        Some(decl) => {
            let rendered = template::render(&decl.path, base_lookup)?;
            Some(ns.resolve(&rendered)?)
        }
        None => None,
    };
    let out_str = output.as_ref().map(|p| p.display().to_string());

    let lookup = |name: &str| -> Option<String> {
        if name == OUT {
            return out_str.clone();
        }
        base_lookup(name)
    };

    let program = template::render(&spec.program, lookup)?;
    let args = spec.args
                   .iter()
                   .map(|a| template::render(a, lookup))
                   .collect::<Result<Vec<_>, _>>()?;
    let working_dir = match &spec.working_dir {
        None => ns.dir().to_path_buf(),
        Some(raw) => {
            let rendered = template::render(raw, lookup)?;
            let p = PathBuf::from(&rendered);
            if p.is_absolute() {
                p
            } else {
                ns.resolve(&rendered)?
            }
        }
    };

    Ok(ResolvedStage { program,
                       args,
                       working_dir,
                       output })
}
