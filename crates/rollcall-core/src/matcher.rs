//! Identity matching of unknown faces against a group's reference sets.

use crate::extractor::{EmbeddingExtractor, ExtractError};
use crate::store::{EncodingStore, StoreError};
use crate::types::{Embedding, GroupId, Image, ImageId, PersonId};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("image {image_id} is not clear enough: no face detected")]
    UnclearImage { image_id: ImageId },
    #[error("extraction failed for image {image_id}: {source}")]
    Extraction {
        image_id: ImageId,
        #[source]
        source: ExtractError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of comparing one probe embedding against a person's references.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Reference embeddings within tolerance of the probe.
    pub votes: usize,
    /// Distance to the closest reference, if any were compared.
    pub best_distance: Option<f32>,
}

impl MatchResult {
    pub fn matched(&self) -> bool {
        self.votes > 0
    }
}

/// Strategy for comparing a probe embedding against a person's reference set.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, references: &[Embedding], tolerance: f32) -> MatchResult;
}

/// Euclidean matcher: a reference votes when its distance is `<= tolerance`.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, references: &[Embedding], tolerance: f32) -> MatchResult {
        let mut votes = 0;
        let mut best: Option<f32> = None;
        for reference in references {
            let d = probe.distance(reference);
            if d <= tolerance {
                votes += 1;
            }
            best = Some(best.map_or(d, |b| b.min(d)));
        }
        MatchResult {
            votes,
            best_distance: best,
        }
    }
}

/// Decides which enrolled persons of a group appear in a batch of photos.
///
/// Constructed per request; holds no request state of its own. Probes are
/// compared with `M`, [`EuclideanMatcher`] unless replaced via [`IdentityMatcher::with_matcher`].
pub struct IdentityMatcher<'a, M = EuclideanMatcher> {
    store: &'a dyn EncodingStore,
    extractor: &'a dyn EmbeddingExtractor,
    match_tolerance: f32,
    strategy: M,
}

impl<'a> IdentityMatcher<'a, EuclideanMatcher> {
    pub fn new(
        store: &'a dyn EncodingStore,
        extractor: &'a dyn EmbeddingExtractor,
        match_tolerance: f32,
    ) -> Self {
        Self {
            store,
            extractor,
            match_tolerance,
            strategy: EuclideanMatcher,
        }
    }
}

impl<'a, M: Matcher> IdentityMatcher<'a, M> {
    pub fn with_matcher<N: Matcher>(self, strategy: N) -> IdentityMatcher<'a, N> {
        IdentityMatcher {
            store: self.store,
            extractor: self.extractor,
            match_tolerance: self.match_tolerance,
            strategy,
        }
    }

    /// Extract every face from every photo.
    ///
    /// The first photo with no detectable face rejects the whole batch.
    pub fn extract_all(&self, photos: &[Image]) -> Result<Vec<Embedding>, MatchError> {
        let mut unknown = Vec::new();
        for photo in photos {
            let faces = self
                .extractor
                .extract(photo)
                .map_err(|source| MatchError::Extraction {
                    image_id: photo.id.clone(),
                    source,
                })?;
            if faces.is_empty() {
                tracing::warn!(image = %photo.id, "no face detected; rejecting batch");
                return Err(MatchError::UnclearImage {
                    image_id: photo.id.clone(),
                });
            }
            tracing::debug!(image = %photo.id, faces = faces.len(), "extracted faces");
            unknown.extend(faces);
        }
        Ok(unknown)
    }

    pub fn match_photos(
        &self,
        group: &GroupId,
        photos: &[Image],
    ) -> Result<BTreeSet<PersonId>, MatchError> {
        let unknown = self.extract_all(photos)?;
        self.match_embeddings(group, &unknown)
    }

    /// Match already-extracted embeddings against everyone enrolled in `group`.
    pub fn match_embeddings(
        &self,
        group: &GroupId,
        unknown: &[Embedding],
    ) -> Result<BTreeSet<PersonId>, MatchError> {
        let persons = self.store.list_persons(group)?;
        let mut recognized = BTreeSet::new();

        for person in persons {
            let references = match self.store.load(group, &person) {
                Ok(set) => set.embeddings,
                Err(e) => {
                    tracing::warn!(%group, %person, error = %e, "cannot load reference set; skipping person");
                    continue;
                }
            };
            if references.is_empty() {
                tracing::debug!(%group, %person, "no reference embeddings; skipping person");
                continue;
            }
            if self.recognizes(&person, &references, unknown) {
                recognized.insert(person);
            }
        }

        tracing::info!(
            %group,
            faces = unknown.len(),
            recognized = recognized.len(),
            "matching complete"
        );
        Ok(recognized)
    }

    /// True as soon as any single unknown embedding collects a vote.
    fn recognizes(&self, person: &PersonId, references: &[Embedding], unknown: &[Embedding]) -> bool {
        for (face, probe) in unknown.iter().enumerate() {
            let result = self.strategy.compare(probe, references, self.match_tolerance);
            if result.matched() {
                tracing::debug!(%person, face, votes = result.votes, distance = ?result.best_distance, "recognized");
                return true;
            }
        }
        false
    }
}
