//! Side inputs: configuración auxiliar clave→valor de sólo lectura.
//!
//! Se cargan una vez por run (antes del primer stage) a través de un
//! `SideInputProvider`. El provider puede además registrar artifacts en el
//! namespace del run (por ejemplo el propio archivo JSON, o una copia
//! modificada de un parameter card) que los stages referencian por nombre.
//! Cualquier escritura queda dentro del namespace del run.
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ArtifactRef, RunNamespace};
use crate::errors::CoreEngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SideValue {
    Number(f64),
    Text(String),
}

impl std::fmt::Display for SideValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SideValue::Number(n) => write!(f, "{n}"),
            SideValue::Text(s) => f.write_str(s),
        }
    }
}

/// Conjunto nombrado de valores. El orden de las claves es el del origen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideInput {
    name: String,
    values: IndexMap<String, SideValue>,
}

impl SideInput {
    pub fn new(name: impl Into<String>, values: IndexMap<String, SideValue>) -> Self {
        Self { name: name.into(),
               values }
    }

    pub fn from_json_slice(name: impl Into<String>, bytes: &[u8]) -> Result<Self, CoreEngineError> {
        let name = name.into();
        let values: IndexMap<String, SideValue> =
            serde_json::from_slice(bytes).map_err(|e| CoreEngineError::ConfigLoadFailure(format!("side input '{name}': {e}")))?;
        Ok(Self { name, values })
    }

    pub async fn load(name: impl Into<String>, path: &Path) -> Result<Self, CoreEngineError> {
        let name = name.into();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
                                                     CoreEngineError::ConfigLoadFailure(format!("side input '{name}' at {}: {e}",
                                                                                                path.display()))
                                                 })?;
        Self::from_json_slice(name, &bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&SideValue> {
        self.values.get(key)
    }

    pub fn values(&self) -> &IndexMap<String, SideValue> {
        &self.values
    }

    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(&self.values).unwrap_or_default()
    }

    /// Dos filas CSV: claves y valores (sin salto de línea final).
    pub fn csv_rows(&self) -> (String, String) {
        let header = self.values.keys().map(|k| csv_field(k)).collect::<Vec<_>>().join(",");
        let row = self.values.values().map(|v| csv_field(&v.to_string())).collect::<Vec<_>>().join(",");
        (header, row)
    }
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// Resultado de preparar un side input para un run.
#[derive(Debug, Clone)]
pub struct ProvidedSideInput {
    pub input: SideInput,
    /// Artifacts registrados en el mapa del run antes del primer stage.
    pub artifacts: Vec<ArtifactRef>,
}

/// Fuente de un side input. Se invoca una vez por run.
#[async_trait]
pub trait SideInputProvider: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Descripción determinista de la configuración (entra al hash del
    /// pipeline).
    fn describe(&self) -> Value;

    /// Nombres lógicos de los artifacts que `provide` registra.
    fn artifact_names(&self) -> Vec<String> {
        vec![self.name().to_string()]
    }

    async fn provide(&self, ns: &RunNamespace) -> Result<ProvidedSideInput, CoreEngineError>;
}

/// Side input leído de un archivo JSON existente.
#[derive(Debug, Clone)]
pub struct FileSideInput {
    name: String,
    path: PathBuf,
}

impl FileSideInput {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { name: name.into(),
               path: path.into() }
    }
}

#[async_trait]
impl SideInputProvider for FileSideInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> Value {
        json!({"kind": "file", "name": self.name, "path": self.path.display().to_string()})
    }

    async fn provide(&self, _ns: &RunNamespace) -> Result<ProvidedSideInput, CoreEngineError> {
        let input = SideInput::load(self.name.clone(), &self.path).await?;
        let artifact = ArtifactRef::new(self.name.clone(), self.path.clone(), format!("side_input:{}", self.name));
        Ok(ProvidedSideInput { input,
                               artifacts: vec![artifact] })
    }
}
