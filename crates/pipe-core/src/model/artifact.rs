//! Referencia neutral a un artifact del pipeline.
//!
//! Un `ArtifactRef` nombra una ubicación de bytes producida por un stage (o
//! registrada por un side input) y consumida en modo lectura por los stages
//! siguientes o por el adaptador HTTP. Es inmutable: los campos sólo se
//! exponen por lectura y cualquier "augmentación" crea una referencia nueva
//! con `derive`, de modo que la trazabilidad al productor original se
//! conserva.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    name: String,
    location: PathBuf,
    produced_by: String,
}

impl ArtifactRef {
    pub fn new(name: impl Into<String>, location: impl Into<PathBuf>, produced_by: impl Into<String>) -> Self {
        Self { name: name.into(),
               location: location.into(),
               produced_by: produced_by.into() }
    }

    /// Nombre lógico con el que los stages lo referencian (`${name}`).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Id del stage (o side input) que lo produjo.
    pub fn produced_by(&self) -> &str {
        &self.produced_by
    }

    /// Nueva referencia con el mismo nombre lógico apuntando a otra
    /// ubicación. La referencia original no se modifica.
    pub fn derive(&self, location: impl Into<PathBuf>, produced_by: impl Into<String>) -> Self {
        Self::new(self.name.clone(), location, produced_by)
    }

    pub fn exists(&self) -> bool {
        self.location.is_file()
    }

    pub async fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.location).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_keeps_name_and_original() {
        let a = ArtifactRef::new("events", "/tmp/run/events.lhe.gz", "madgraph");
        let b = a.derive("/tmp/run/events.lhe", "madgraph:decompress");
        assert_eq!(b.name(), "events");
        assert_eq!(a.location(), Path::new("/tmp/run/events.lhe.gz"));
        assert_eq!(b.produced_by(), "madgraph:decompress");
    }

    #[test]
    fn exists_and_read_bytes_follow_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("particles.csv");
        let a = ArtifactRef::new("particles", &path, "pythia");
        assert!(!a.exists());
        std::fs::write(&path, "pT\n1.0\n").unwrap();
        assert!(a.exists());
        assert_eq!(tokio_test::block_on(a.read_bytes()).unwrap(), b"pT\n1.0\n");
    }
}
