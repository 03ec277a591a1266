//! Extractor reading precomputed embeddings stored next to each image.
//!
//! `photo.jpg` is accompanied by `photo.jpg.embeddings.json`, a JSON list with
//! one float list per detected face (`[]` when the photo has no face).

use rollcall_core::{Embedding, EmbeddingExtractor, ExtractError, Image};
use std::path::{Path, PathBuf};

pub const SIDECAR_SUFFIX: &str = ".embeddings.json";

pub fn sidecar_path(image: &Path) -> PathBuf {
    let mut name = image.as_os_str().to_owned();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

pub fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(SIDECAR_SUFFIX))
}

pub struct SidecarExtractor;

impl EmbeddingExtractor for SidecarExtractor {
    fn extract(&self, image: &Image) -> Result<Vec<Embedding>, ExtractError> {
        let path = sidecar_path(&image.path);
        let bytes = std::fs::read(&path).map_err(|source| ExtractError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let faces: Vec<Vec<f32>> = serde_json::from_slice(&bytes)
            .map_err(|e| ExtractError::Malformed(format!("{}: {e}", path.display())))?;
        if let Some(dim) = faces.first().map(Vec::len) {
            if dim == 0 || faces.iter().any(|f| f.len() != dim) {
                return Err(ExtractError::Malformed(format!(
                    "{}: faces must share one non-zero dimension",
                    path.display()
                )));
            }
        }
        tracing::debug!(image = %image.id, faces = faces.len(), "read sidecar embeddings");
        Ok(faces.into_iter().map(Embedding::new).collect())
    }
}
