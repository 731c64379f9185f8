//! Transformaciones posteriores a un stage.
//!
//! Ninguna transformación reescribe su entrada: siempre escriben un archivo
//! nuevo junto al original y devuelven un `ArtifactRef` derivado. Cualquier
//! error aquí es `PostProcessFailure`.
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use indexmap::IndexMap;
use tokio::io::AsyncWriteExt;

use crate::errors::CoreEngineError;
use crate::model::{ArtifactRef, OutputTransform, SideInput};

/// Aplica `transform` a la salida de un stage.
pub async fn apply(transform: &OutputTransform,
                   artifact: &ArtifactRef,
                   stage_id: &str,
                   side_inputs: &IndexMap<String, SideInput>)
                   -> Result<ArtifactRef, CoreEngineError> {
    match transform {
        OutputTransform::None => Ok(artifact.clone()),
        OutputTransform::Decompress => decompress(artifact, &format!("{stage_id}:decompress")).await,
        OutputTransform::AugmentWith { side_input } => {
            let si = side_inputs.get(side_input)
                                .ok_or_else(|| CoreEngineError::PostProcessFailure(format!("side input '{side_input}' not loaded")))?;
            augment(artifact, si, &format!("{stage_id}:augment")).await
        }
    }
}

/// Ruta del archivo descomprimido: sin `.gz`, o con `.out` si no lo tenía.
pub fn decompressed_path(src: &Path) -> PathBuf {
    match src.to_str().and_then(|s| s.strip_suffix(".gz")) {
        Some(stripped) if !stripped.is_empty() => PathBuf::from(stripped),
        _ => {
            let mut s = src.as_os_str().to_owned();
            s.push(".out");
            PathBuf::from(s)
        }
    }
}

/// `datos.csv` -> `datos.augmented.csv`; sin extensión -> `datos.augmented`.
pub fn augmented_path(src: &Path) -> PathBuf {
    let stem = src.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match src.extension() {
        Some(ext) => format!("{stem}.augmented.{}", ext.to_string_lossy()),
        None => format!("{stem}.augmented"),
    };
    src.with_file_name(name)
}

pub async fn decompress(artifact: &ArtifactRef, produced_by: &str) -> Result<ArtifactRef, CoreEngineError> {
    let src = artifact.location().to_path_buf();
    let dst = decompressed_path(&src);
    let dst_clone = dst.clone();
    let written = tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
                      let input = File::open(&src)?;
                      let mut decoder = MultiGzDecoder::new(BufReader::new(input));
                      let mut out = BufWriter::new(File::create(&dst_clone)?);
                      let n = std::io::copy(&mut decoder, &mut out)?;
                      std::io::Write::flush(&mut out)?;
                      Ok(n)
                  }).await
                    .map_err(|e| CoreEngineError::PostProcessFailure(format!("decompress task: {e}")))?
                    .map_err(|e| {
                        CoreEngineError::PostProcessFailure(format!("decompress {}: {e}", artifact.location().display()))
                    })?;
    log::debug!(target: "pipeflow::run", "decompressed {} -> {} ({written} bytes)", artifact.location().display(), dst.display());
    Ok(artifact.derive(dst, produced_by))
}

pub async fn augment(artifact: &ArtifactRef, side_input: &SideInput, produced_by: &str) -> Result<ArtifactRef, CoreEngineError> {
    let dst = augmented_path(artifact.location());
    let fail = |e: std::io::Error| CoreEngineError::PostProcessFailure(format!("augment {}: {e}", dst.display()));

    let mut src = tokio::fs::File::open(artifact.location()).await.map_err(fail)?;
    let mut out = tokio::fs::File::create(&dst).await.map_err(fail)?;
    let (header, row) = side_input.csv_rows();
    out.write_all(format!("{header}\n{row}\n").as_bytes()).await.map_err(fail)?;
    tokio::io::copy(&mut src, &mut out).await.map_err(fail)?;
    out.flush().await.map_err(fail)?;
    Ok(artifact.derive(dst, produced_by))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn paths() {
        assert_eq!(decompressed_path(Path::new("/r/e.lhe.gz")), PathBuf::from("/r/e.lhe"));
        assert_eq!(decompressed_path(Path::new("/r/e.lhe")), PathBuf::from("/r/e.lhe.out"));
        assert_eq!(augmented_path(Path::new("/r/p.csv")), PathBuf::from("/r/p.augmented.csv"));
        assert_eq!(augmented_path(Path::new("/r/p")), PathBuf::from("/r/p.augmented"));
    }

    #[tokio::test]
    async fn decompress_keeps_the_input() {
        let dir = tempfile::tempdir().unwrap();
        let gz = dir.path().join("events.lhe.gz");
        let mut enc = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        enc.write_all(b"<LesHouchesEvents>").unwrap();
        enc.finish().unwrap();

        let a = ArtifactRef::new("events", &gz, "madgraph");
        let out = decompress(&a, "madgraph:decompress").await.unwrap();
        assert_eq!(std::fs::read(out.location()).unwrap(), b"<LesHouchesEvents>");
        assert!(gz.exists());
        assert_eq!(out.name(), "events");
    }

    #[tokio::test]
    async fn decompress_of_plain_text_fails_as_post_process() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("plain.gz");
        std::fs::write(&p, b"not gzip").unwrap();
        let err = decompress(&ArtifactRef::new("x", &p, "s"), "s").await.unwrap_err();
        assert!(matches!(err, CoreEngineError::PostProcessFailure(_)));
    }

    #[tokio::test]
    async fn augment_prepends_two_rows() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("particles.csv");
        std::fs::write(&p, "pT,Rapidity\n1.0,2.0\n").unwrap();
        let si = SideInput::from_json_slice("coefficients", br#"{"1": 0.5, "2": -2}"#).unwrap();
        let out = augment(&ArtifactRef::new("particles", &p, "pythia"), &si, "pythia:augment").await.unwrap();
        assert_eq!(std::fs::read_to_string(out.location()).unwrap(), "1,2\n0.5,-2\npT,Rapidity\n1.0,2.0\n");
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "pT,Rapidity\n1.0,2.0\n");
    }

    #[tokio::test]
    async fn augment_with_unknown_side_input_fails() {
        let a = ArtifactRef::new("p", "/nonexistent", "s");
        let t = OutputTransform::AugmentWith { side_input: "missing".into() };
        let err = apply(&t, &a, "s", &IndexMap::new()).await.unwrap_err();
        assert!(matches!(err, CoreEngineError::PostProcessFailure(_)));
    }
}
