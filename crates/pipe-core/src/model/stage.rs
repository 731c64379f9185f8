//! Definición declarativa de un stage.
//!
//! Un `StageSpec` describe un único proceso externo: ejecutable, plantilla
//! de argumentos, directorio de trabajo, artifacts que consume, artifact que
//! declara producir y transformación opcional de su salida. Se define antes
//! de que el run empiece y el engine nunca lo modifica.
use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_SUCCESS_CODE;
use crate::hashing::hash_value;

/// Transformación aplicada a la salida declarada cuando el proceso termina
/// con el exit code esperado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputTransform {
    #[default]
    None,
    /// gzip -> archivo nuevo sin el sufijo `.gz`.
    Decompress,
    /// Antepone las claves y valores del side input indicado.
    AugmentWith { side_input: String },
}

/// Artifact que el stage promete escribir. `path` es relativo al namespace
/// del run y puede usar la plantilla `${...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDecl {
    pub name: String,
    pub path: String,
}

fn default_success_code() -> i32 {
    DEFAULT_SUCCESS_CODE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub id: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Relativo al namespace del run; `None` = el propio namespace.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Nombres lógicos que deben existir antes de lanzar el proceso.
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub output: Option<OutputDecl>,
    #[serde(default = "default_success_code")]
    pub success_code: i32,
    #[serde(default)]
    pub transform: OutputTransform,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl StageSpec {
    pub fn new(id: impl Into<String>, program: impl Into<String>) -> Self {
        Self { id: id.into(),
               program: program.into(),
               args: Vec::new(),
               working_dir: None,
               inputs: Vec::new(),
               output: None,
               success_code: DEFAULT_SUCCESS_CODE,
               transform: OutputTransform::None,
               timeout_ms: None,
               env: BTreeMap::new() }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    pub fn output(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.output = Some(OutputDecl { name: name.into(),
                                        path: path.into() });
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn success_code(mut self, code: i32) -> Self {
        self.success_code = code;
        self
    }

    pub fn transform(mut self, transform: OutputTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Nombre lógico del artifact producido, si declara uno.
    pub fn output_name(&self) -> Option<&str> {
        self.output.as_ref().map(|o| o.name.as_str())
    }

    /// Hash estable de la definición completa (entra en el fingerprint del
    /// pipeline).
    pub fn definition_hash(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        hash_value(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_applies_defaults() {
        let raw = r#"{"id":"pythia","program":"/opt/pgen","args":["${events}","${out}"],
                      "inputs":["events"],"output":{"name":"particles","path":"particles.csv"}}"#;
        let spec: StageSpec = serde_json::from_str(raw).unwrap();
        assert_eq!(spec.success_code, 0);
        assert_eq!(spec.transform, OutputTransform::None);
        assert_eq!(spec.output_name(), Some("particles"));
        assert!(spec.timeout_duration().is_none());
    }

    #[test]
    fn transform_is_tagged_by_kind() {
        let t: OutputTransform = serde_json::from_str(r#"{"kind":"augment_with","side_input":"coefficients"}"#).unwrap();
        assert_eq!(t, OutputTransform::AugmentWith { side_input: "coefficients".into() });
    }

    #[test]
    fn definition_hash_changes_with_args() {
        let a = StageSpec::new("a", "sh").arg("-c");
        let b = StageSpec::new("a", "sh").arg("-x");
        assert_ne!(a.definition_hash(), b.definition_hash());
        assert_eq!(a.definition_hash(), a.clone().definition_hash());
    }
}
