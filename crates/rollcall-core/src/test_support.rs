//! Fixture extractor for unit tests.

use crate::extractor::{EmbeddingExtractor, ExtractError};
use crate::types::{Embedding, Image, ImageId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns canned embeddings per image id; unknown ids yield no faces.
#[derive(Default)]
pub struct FixtureExtractor {
    faces: HashMap<ImageId, Vec<Embedding>>,
    broken: Vec<ImageId>,
    calls: AtomicUsize,
}

impl FixtureExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faces(mut self, image: &str, faces: &[&[f32]]) -> Self {
        self.faces.insert(
            image.into(),
            faces.iter().map(|v| Embedding::new(v.to_vec())).collect(),
        );
        self
    }

    pub fn with_broken(mut self, image: &str) -> Self {
        self.broken.push(image.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingExtractor for FixtureExtractor {
    fn extract(&self, image: &Image) -> Result<Vec<Embedding>, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.contains(&image.id) {
            return Err(ExtractError::Malformed(format!("{} is truncated", image.id)));
        }
        Ok(self.faces.get(&image.id).cloned().unwrap_or_default())
    }
}

pub fn image(id: &str) -> Image {
    Image::new(id, format!("/fixtures/{id}.jpg"))
}
