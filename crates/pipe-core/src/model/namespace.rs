//! Namespace de artifacts por run e iteración.
//!
//! Cada iteración de cada run escribe en `<base>/<run_id>/iter-<k>/`. Todas
//! las rutas relativas de los `StageSpec` se resuelven dentro de ese
//! directorio, así dos runs concurrentes con los mismos nombres lógicos nunca
//! comparten archivos. `resolve` rechaza rutas absolutas y componentes `..`.
use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

use crate::constants::ITERATION_DIR_PREFIX;
use crate::errors::CoreEngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunNamespace {
    run_id: Uuid,
    iteration: u32,
    root: PathBuf,
    dir: PathBuf,
}

impl RunNamespace {
    /// Calcula las rutas sin tocar el filesystem.
    pub fn new(base: &Path, run_id: Uuid, iteration: u32) -> Self {
        let root = base.join(run_id.to_string());
        let dir = root.join(format!("{ITERATION_DIR_PREFIX}{iteration}"));
        Self { run_id,
               iteration,
               root,
               dir }
    }

    /// Crea el directorio de la iteración.
    pub async fn create(base: &Path, run_id: Uuid, iteration: u32) -> Result<Self, CoreEngineError> {
        let ns = Self::new(base, run_id, iteration);
        tokio::fs::create_dir_all(&ns.dir).await
                                          .map_err(|e| CoreEngineError::Internal(format!("cannot create namespace {}: {e}", ns.dir.display())))?;
        Ok(ns)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Directorio de esta iteración.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directorio del run completo (compartido por sus iteraciones).
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, relative: &str) -> Result<PathBuf, CoreEngineError> {
        resolve_within(&self.dir, relative)
    }
}

/// Une `relative` a `dir` garantizando que el resultado queda dentro de `dir`.
pub fn resolve_within(dir: &Path, relative: &str) -> Result<PathBuf, CoreEngineError> {
    let rel = Path::new(relative);
    if relative.is_empty() {
        return Err(CoreEngineError::ConfigLoadFailure("empty artifact path".into()));
    }
    for c in rel.components() {
        match c {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(CoreEngineError::ConfigLoadFailure(format!("artifact path escapes the run namespace: {relative}")))
            }
        }
    }
    Ok(dir.join(rel))
}
