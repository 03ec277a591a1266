//! Embedding extraction seam.
//!
//! Face detection and embedding models live outside this crate; anything that
//! turns a photograph into zero or more face embeddings plugs in here.

use crate::types::{Embedding, Image};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed image data: {0}")]
    Malformed(String),
}

/// Given an image, produce one embedding per detected face.
///
/// An empty result is not an error at this layer: callers decide whether a
/// face-less image is skipped (reference photos) or rejected (attendance photos).
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, image: &Image) -> Result<Vec<Embedding>, ExtractError>;
}
