//! Acumulación de los artifacts de cada iteración en un único CSV.
//!
//! El primer artifact entregado se copia completo; de los siguientes se
//! descartan las primeras `skip_lines` líneas (la cabecera, por defecto).
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pipe_core::{ArtifactRef, CoreEngineError, IterationObserver, IterationOutput};
use tokio::io::AsyncWriteExt;

pub const DEFAULT_SKIP_LINES: usize = 1;

#[derive(Debug, Clone)]
pub struct CsvAccumulator {
    name: String,
    path: PathBuf,
    skip_lines: usize,
    appended: usize,
    ends_with_newline: bool,
}

impl CsvAccumulator {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { name: name.into(),
               path: path.into(),
               skip_lines: DEFAULT_SKIP_LINES,
               appended: 0,
               ends_with_newline: true }
    }

    pub fn with_skip_lines(mut self, skip_lines: usize) -> Self {
        self.skip_lines = skip_lines;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Artifacts acumulados hasta ahora.
    pub fn appended(&self) -> usize {
        self.appended
    }

    /// El archivo combinado, si ya recibió al menos un artifact.
    pub fn artifact(&self) -> Option<ArtifactRef> {
        (self.appended > 0).then(|| ArtifactRef::new(self.name.clone(), self.path.clone(), "accumulator"))
    }

    async fn append(&mut self, source: &ArtifactRef) -> std::io::Result<()> {
        let bytes = source.read_bytes().await?;
        let body: &[u8] = if self.appended == 0 { &bytes } else { skip_lines(&bytes, self.skip_lines) };

        if self.appended == 0 {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new().create(true)
                                                    .write(true)
                                                    .append(self.appended > 0)
                                                    .truncate(self.appended == 0)
                                                    .open(&self.path)
                                                    .await?;
        if !body.is_empty() {
            if !self.ends_with_newline {
                file.write_all(b"\n").await?;
            }
            file.write_all(body).await?;
            self.ends_with_newline = body.ends_with(b"\n");
        }
        file.flush().await?;
        self.appended += 1;
        Ok(())
    }
}

/// Resto de `bytes` tras sus primeras `n` líneas.
fn skip_lines(bytes: &[u8], n: usize) -> &[u8] {
    let mut rest = bytes;
    for _ in 0..n {
        match rest.iter().position(|b| *b == b'\n') {
            Some(i) => rest = &rest[i + 1..],
            None => return &[],
        }
    }
    rest
}

#[async_trait]
impl IterationObserver for CsvAccumulator {
    async fn deliver(&mut self, output: &IterationOutput) -> Result<(), CoreEngineError> {
        self.append(&output.artifact).await.map_err(|e| {
                                               CoreEngineError::PostProcessFailure(format!("accumulate {} into {}: {e}",
                                                                                           output.artifact.location().display(),
                                                                                           self.path.display()))
                                           })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(k: u32, artifact: ArtifactRef) -> IterationOutput {
        IterationOutput { run_id: Default::default(),
                          iteration: k,
                          artifact }
    }

    #[test]
    fn skip_lines_handles_short_input() {
        assert_eq!(skip_lines(b"h\n1\n2\n", 1), b"1\n2\n");
        assert_eq!(skip_lines(b"h", 1), b"");
        assert_eq!(skip_lines(b"a\nb\n", 0), b"a\nb\n");
    }

    #[tokio::test]
    async fn concatenates_keeping_the_first_header() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        std::fs::write(&a, "pT,y\n1,2").unwrap();
        std::fs::write(&b, "pT,y\n3,4\n").unwrap();
        let mut acc = CsvAccumulator::new("combined", dir.path().join("out/combined.csv"));

        acc.deliver(&output(1, ArtifactRef::new("p", &a, "s"))).await.unwrap();
        acc.deliver(&output(2, ArtifactRef::new("p", &b, "s"))).await.unwrap();

        assert_eq!(std::fs::read_to_string(acc.path()).unwrap(), "pT,y\n1,2\n3,4\n");
        assert_eq!(acc.appended(), 2);
        assert_eq!(acc.artifact().unwrap().name(), "combined");
    }

    #[tokio::test]
    async fn unreadable_artifact_is_post_process_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut acc = CsvAccumulator::new("combined", dir.path().join("combined.csv"));
        let err = acc.deliver(&output(1, ArtifactRef::new("p", dir.path().join("absent"), "s"))).await.unwrap_err();
        assert!(matches!(err, CoreEngineError::PostProcessFailure(_)));
        assert!(acc.artifact().is_none());
    }
}
