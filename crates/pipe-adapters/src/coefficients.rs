//! Side input de coeficientes aleatorios.
//!
//! Por run genera `count` valores uniformes en `[min, max]` con claves
//! `"1".."count"`, los escribe como `<name>.json` en el namespace de la
//! iteración y los registra como artifact `<name>`. Con un parameter card
//! configurado escribe además `param_card.dat` (plantilla con el bloque
//! SMEFT parcheado) como artifact `<name>_card`. La plantilla no se toca.
use std::path::PathBuf;

use async_trait::async_trait;
use indexmap::IndexMap;
use pipe_core::{ArtifactRef, CoreEngineError, ProvidedSideInput, RunNamespace, SideInput, SideInputProvider, SideValue};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use crate::param_card::patch_smeft_block;

pub const DEFAULT_COUNT: usize = 9;
pub const DEFAULT_MIN: f64 = -10.0;
pub const DEFAULT_MAX: f64 = 10.0;
pub const PATCHED_CARD_FILE: &str = "param_card.dat";

#[derive(Debug, Clone)]
pub struct RandomCoefficients {
    name: String,
    count: usize,
    min: f64,
    max: f64,
    seed: Option<u64>,
    param_card: Option<PathBuf>,
}

impl RandomCoefficients {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(),
               count: DEFAULT_COUNT,
               min: DEFAULT_MIN,
               max: DEFAULT_MAX,
               seed: None,
               param_card: None }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Semilla base; cada iteración usa `seed + iteration`.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_param_card(mut self, template: impl Into<PathBuf>) -> Self {
        self.param_card = Some(template.into());
        self
    }

    pub fn card_artifact_name(&self) -> String {
        format!("{}_card", self.name)
    }

    pub fn validate(&self) -> Result<(), CoreEngineError> {
        if self.count == 0 {
            return Err(CoreEngineError::ConfigLoadFailure(format!("side input '{}': count must be at least 1", self.name)));
        }
        if !(self.min.is_finite() && self.max.is_finite() && self.min <= self.max) {
            return Err(CoreEngineError::ConfigLoadFailure(format!("side input '{}': invalid range [{}, {}]",
                                                                  self.name, self.min, self.max)));
        }
        Ok(())
    }

    /// Valores indexados desde 1.
    pub fn generate(&self, iteration: u32) -> IndexMap<u32, f64> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(u64::from(iteration))),
            None => StdRng::from_entropy(),
        };
        (1..=self.count as u32).map(|i| (i, rng.gen_range(self.min..=self.max))).collect()
    }
}

#[async_trait]
impl SideInputProvider for RandomCoefficients {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> Value {
        json!({
            "kind": "random_coefficients",
            "name": self.name,
            "count": self.count,
            "min": self.min,
            "max": self.max,
            "seed": self.seed,
            "param_card": self.param_card.as_ref().map(|p| p.display().to_string()),
        })
    }

    fn artifact_names(&self) -> Vec<String> {
        let mut names = vec![self.name.clone()];
        if self.param_card.is_some() {
            names.push(self.card_artifact_name());
        }
        names
    }

    async fn provide(&self, ns: &RunNamespace) -> Result<ProvidedSideInput, CoreEngineError> {
        self.validate()?;
        let generated = self.generate(ns.iteration());
        let values: IndexMap<String, SideValue> = generated.iter().map(|(k, v)| (k.to_string(), SideValue::Number(*v))).collect();
        let input = SideInput::new(self.name.clone(), values);
        let produced_by = format!("side_input:{}", self.name);

        let json_path = ns.resolve(&format!("{}.json", self.name))?;
        tokio::fs::write(&json_path, input.to_json_bytes()).await
                                                            .map_err(|e| CoreEngineError::Internal(format!("write {}: {e}", json_path.display())))?;
        let mut artifacts = vec![ArtifactRef::new(self.name.clone(), json_path, produced_by.clone())];

        if let Some(template) = &self.param_card {
            let card = tokio::fs::read_to_string(template).await.map_err(|e| {
                                                                     CoreEngineError::ConfigLoadFailure(format!("param card {}: {e}",
                                                                                                                template.display()))
                                                                 })?;
            let patched = patch_smeft_block(&card, &generated, self.count).map_err(|e| {
                                                                               CoreEngineError::ConfigLoadFailure(format!("param card {}: {e}",
                                                                                                                          template.display()))
                                                                           })?;
            let card_path = ns.resolve(PATCHED_CARD_FILE)?;
            tokio::fs::write(&card_path, patched).await
                                                 .map_err(|e| CoreEngineError::Internal(format!("write {}: {e}", card_path.display())))?;
            artifacts.push(ArtifactRef::new(self.card_artifact_name(), card_path, produced_by));
        }

        log::debug!("side input '{}' generated {} coefficients for {}", self.name, self.count, ns.dir().display());
        Ok(ProvidedSideInput { input, artifacts })
    }
}
