//! Definición validada de un pipeline y su builder.
//!
//! `PipelineBuilder` acumula stages y side inputs; `build()` comprueba el
//! grafo de nombres antes de que exista ningún run:
//! - ids de stage únicos y al menos un stage;
//! - el último stage declara salida (es el artifact final del run);
//! - cada input nombra la salida de un stage anterior o un artifact de side
//!   input, y cada nombre lógico se produce una sola vez;
//! - las plantillas sólo referencian builtins o inputs declarados, y
//!   `${out}` sólo aparece en stages que declaran salida;
//! - `augment_with` nombra un side input registrado.
//!
//! Cualquier incumplimiento es `ConfigLoadFailure`.
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::constants::ENGINE_VERSION;
use crate::errors::CoreEngineError;
use crate::hashing::hash_value;
use crate::model::{OutputTransform, SideInputProvider, StageSpec};
use crate::template::{self, OUT};

/// Pipeline inmutable listo para ejecutarse.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<StageSpec>,
    side_inputs: Vec<Arc<dyn SideInputProvider>>,
    definition_hash: String,
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn side_inputs(&self) -> &[Arc<dyn SideInputProvider>] {
        &self.side_inputs
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn definition_hash(&self) -> &str {
        &self.definition_hash
    }

    pub fn has_side_input(&self, name: &str) -> bool {
        self.side_inputs.iter().any(|p| p.name() == name)
    }

    /// Nombre lógico del artifact final (salida del último stage).
    pub fn final_output_name(&self) -> Option<&str> {
        self.stages.last().and_then(|s| s.output_name())
    }
}

#[derive(Debug, Default)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageSpec>,
    side_inputs: Vec<Arc<dyn SideInputProvider>>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(),
               ..Default::default() }
    }

    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    pub fn stages<I: IntoIterator<Item = StageSpec>>(mut self, specs: I) -> Self {
        self.stages.extend(specs);
        self
    }

    pub fn side_input(mut self, provider: Arc<dyn SideInputProvider>) -> Self {
        self.side_inputs.push(provider);
        self
    }

    pub fn build(self) -> Result<Pipeline, CoreEngineError> {
        let fail = |msg: String| CoreEngineError::ConfigLoadFailure(format!("pipeline '{}': {msg}", self.name));

        if self.stages.is_empty() {
            return Err(fail("no stages declared".into()));
        }

        let mut known: HashSet<String> = HashSet::new();
        let mut side_names: HashSet<&str> = HashSet::new();
        for p in &self.side_inputs {
            if !side_names.insert(p.name()) {
                return Err(fail(format!("side input '{}' declared twice", p.name())));
            }
            for a in p.artifact_names() {
                if !known.insert(a.clone()) {
                    return Err(fail(format!("artifact name '{a}' registered twice")));
                }
            }
        }

        let mut ids: HashSet<&str> = HashSet::new();
        for spec in &self.stages {
            if spec.id.trim().is_empty() {
                return Err(fail("stage with empty id".into()));
            }
            if !ids.insert(spec.id.as_str()) {
                return Err(fail(format!("duplicate stage id '{}'", spec.id)));
            }
            for input in &spec.inputs {
                if !known.contains(input) {
                    return Err(fail(format!("stage '{}' requires '{input}' which no earlier stage or side input produces",
                                            spec.id)));
                }
            }
            check_templates(spec).map_err(fail)?;
            if let OutputTransform::AugmentWith { side_input } = &spec.transform {
                if !side_names.contains(side_input.as_str()) {
                    return Err(fail(format!("stage '{}' augments with unknown side input '{side_input}'", spec.id)));
                }
            }
            if let Some(name) = spec.output_name() {
                if !known.insert(name.to_string()) {
                    return Err(fail(format!("artifact name '{name}' produced twice (stage '{}')", spec.id)));
                }
            }
        }

        if self.stages.last().and_then(|s| s.output.as_ref()).is_none() {
            return Err(fail("the last stage must declare an output".into()));
        }

        let definition_hash = compute_definition_hash(&self.name, &self.stages, &self.side_inputs);
        Ok(Pipeline { name: self.name,
                      stages: self.stages,
                      side_inputs: self.side_inputs,
                      definition_hash })
    }
}

fn check_templates(spec: &StageSpec) -> Result<(), String> {
    let allowed = |name: &str| -> bool {
        if name == OUT {
            return spec.output.is_some();
        }
        template::is_builtin(name) || spec.inputs.iter().any(|i| i == name)
    };

    let mut templates: Vec<&str> = vec![spec.program.as_str()];
    templates.extend(spec.args.iter().map(String::as_str));
    if let Some(dir) = &spec.working_dir {
        templates.push(dir);
    }
    for t in templates {
        for name in template::placeholders(t).map_err(|e| format!("stage '{}': {e}", spec.id))? {
            if !allowed(&name) {
                return Err(format!("stage '{}' references undeclared '${{{name}}}'", spec.id));
            }
        }
    }
    if let Some(out) = &spec.output {
        for name in template::placeholders(&out.path).map_err(|e| format!("stage '{}': {e}", spec.id))? {
            if name == OUT || !allowed(&name) {
                return Err(format!("stage '{}' output path references '${{{name}}}'", spec.id));
            }
        }
    }
    Ok(())
}

fn compute_definition_hash(name: &str, stages: &[StageSpec], side_inputs: &[Arc<dyn SideInputProvider>]) -> String {
    let stages: Vec<Value> = stages.iter().map(|s| json!(s.definition_hash())).collect();
    let side: Vec<Value> = side_inputs.iter().map(|p| p.describe()).collect();
    hash_value(&json!({
        "engine_version": ENGINE_VERSION,
        "name": name,
        "stages": stages,
        "side_inputs": side,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileSideInput;

    fn two_stages() -> PipelineBuilder {
        Pipeline::builder("p").stage(StageSpec::new("a", "sh").args(["-c", "echo a > ${out}"]).output("x", "x.txt"))
                              .stage(StageSpec::new("b", "sh").args(["-c", "cat ${x} > ${out}"])
                                                              .input("x")
                                                              .output("y", "y.txt"))
    }

    #[test]
    fn builds_valid_pipeline() {
        let p = two_stages().build().unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.final_output_name(), Some("y"));
        assert_eq!(p.definition_hash(), two_stages().build().unwrap().definition_hash());
    }

    #[test]
    fn rejects_input_from_later_stage() {
        let err = Pipeline::builder("p").stage(StageSpec::new("a", "sh").input("y").output("x", "x"))
                                        .stage(StageSpec::new("b", "sh").output("y", "y"))
                                        .build()
                                        .unwrap_err();
        assert!(matches!(err, CoreEngineError::ConfigLoadFailure(m) if m.contains("requires 'y'")));
    }

    #[test]
    fn rejects_undeclared_placeholder() {
        let err = Pipeline::builder("p").stage(StageSpec::new("a", "sh").arg("${events}").output("x", "x"))
                                        .build()
                                        .unwrap_err();
        assert!(matches!(err, CoreEngineError::ConfigLoadFailure(_)));
    }

    #[test]
    fn rejects_missing_final_output_and_duplicates() {
        assert!(Pipeline::builder("p").stage(StageSpec::new("a", "true")).build().is_err());
        assert!(Pipeline::builder("p").build().is_err());
        assert!(Pipeline::builder("p").stage(StageSpec::new("a", "true").output("x", "x"))
                                      .stage(StageSpec::new("a", "true").output("y", "y"))
                                      .build()
                                      .is_err());
        assert!(Pipeline::builder("p").stage(StageSpec::new("a", "true").output("x", "x"))
                                      .stage(StageSpec::new("b", "true").output("x", "x2"))
                                      .build()
                                      .is_err());
    }

    #[test]
    fn side_input_artifacts_are_valid_inputs() {
        let p = Pipeline::builder("p").side_input(Arc::new(FileSideInput::new("coefficients", "/cfg/c.json")))
                                      .stage(StageSpec::new("a", "gen").arg("${coefficients}")
                                                                       .input("coefficients")
                                                                       .output("x", "x")
                                                                       .transform(OutputTransform::AugmentWith { side_input:
                                                                                                                   "coefficients".into() }))
                                      .build()
                                      .unwrap();
        assert!(p.has_side_input("coefficients"));

        let err = Pipeline::builder("p").stage(StageSpec::new("a", "gen").output("x", "x")
                                                                         .transform(OutputTransform::AugmentWith { side_input:
                                                                                                                     "nope".into() }))
                                        .build()
                                        .unwrap_err();
        assert!(matches!(err, CoreEngineError::ConfigLoadFailure(m) if m.contains("unknown side input")));
    }
}
