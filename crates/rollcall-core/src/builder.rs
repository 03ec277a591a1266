//! Encoding builder: grows a person's reference set from new images.

use crate::extractor::{EmbeddingExtractor, ExtractError};
use crate::store::{EncodingStore, StoreError};
use crate::types::{AppendOutcome, Embedding, GroupId, Image, ImageId, PersonId};
use serde::Serialize;
use thiserror::Error;

/// Save attempts before a contended person is reported as failed.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("extraction failed for image {image_id}: {source}")]
    Extraction {
        image_id: ImageId,
        #[source]
        source: ExtractError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("gave up saving {group_id}/{person_id} after {attempts} conflicting writes")]
    ConflictRetriesExhausted {
        group_id: GroupId,
        person_id: PersonId,
        attempts: usize,
    },
}

/// Bookkeeping for one builder run on one person.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildOutcome {
    pub group_id: GroupId,
    pub person_id: PersonId,
    /// Images that yielded at least one embedding, in input order.
    pub processed: Vec<ImageId>,
    /// Images with no detectable face.
    pub no_face: Vec<ImageId>,
    pub appended: usize,
    pub discarded: usize,
    /// Persisted revision after the run.
    pub revision: u64,
}

/// Stateless builder; holds only its collaborators.
pub struct EncodingBuilder<'a> {
    store: &'a dyn EncodingStore,
    extractor: &'a dyn EmbeddingExtractor,
    dedup_threshold: f32,
    max_attempts: usize,
}

impl<'a> EncodingBuilder<'a> {
    pub fn new(
        store: &'a dyn EncodingStore,
        extractor: &'a dyn EmbeddingExtractor,
        dedup_threshold: f32,
    ) -> Self {
        Self {
            store,
            extractor,
            dedup_threshold,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn build(
        &self,
        group: &GroupId,
        person: &PersonId,
        images: &[Image],
    ) -> Result<BuildOutcome, BuildError> {
        let _span = tracing::info_span!("build", %group, %person).entered();

        // Extraction happens once, outside the load/save cycle, so a conflict
        // retry never re-runs the model.
        let mut candidates: Vec<Embedding> = Vec::new();
        let mut processed = Vec::new();
        let mut no_face = Vec::new();
        for image in images {
            let faces = self
                .extractor
                .extract(image)
                .map_err(|source| BuildError::Extraction {
                    image_id: image.id.clone(),
                    source,
                })?;
            if faces.is_empty() {
                tracing::debug!(image = %image.id, "no face in reference image; skipping");
                no_face.push(image.id.clone());
                continue;
            }
            processed.push(image.id.clone());
            candidates.extend(faces);
        }

        for attempt in 1..=self.max_attempts {
            let mut set = self.store.load(group, person)?;
            let mut appended = 0;
            let mut discarded = 0;
            for candidate in &candidates {
                match set.try_append(candidate.clone(), self.dedup_threshold) {
                    AppendOutcome::Appended => appended += 1,
                    AppendOutcome::NearDuplicate => discarded += 1,
                    AppendOutcome::DimensionMismatch => {
                        tracing::warn!(
                            expected = ?set.dim(),
                            got = candidate.dim(),
                            "embedding dimension differs from stored set; discarding"
                        );
                        discarded += 1;
                    }
                }
            }

            let revision = if appended > 0 {
                match self.store.save(&set) {
                    Ok(revision) => revision,
                    Err(StoreError::Conflict { found, .. }) => {
                        tracing::debug!(attempt, found, "concurrent write; reloading");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            } else {
                set.revision
            };

            tracing::info!(
                images = images.len(),
                appended,
                discarded,
                stored = set.len(),
                revision,
                "reference set updated"
            );
            return Ok(BuildOutcome {
                group_id: group.clone(),
                person_id: person.clone(),
                processed,
                no_face,
                appended,
                discarded,
                revision,
            });
        }

        Err(BuildError::ConflictRetriesExhausted {
            group_id: group.clone(),
            person_id: person.clone(),
            attempts: self.max_attempts,
        })
    }
}
