use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Distance below which a new reference embedding is considered a duplicate.
pub const DEFAULT_DEDUP_THRESHOLD: f32 = 0.5;
/// Distance up to which an unknown embedding matches a reference embedding.
pub const DEFAULT_MATCH_TOLERANCE: f32 = 0.6;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identification scope (e.g. a class section). All matching is scoped to one group.
    GroupId
);
string_id!(
    /// Enrolled person (e.g. a student).
    PersonId
);
string_id!(
    /// Identifier of a reference or query photograph.
    ImageId
);

/// Face embedding vector produced by an [`EmbeddingExtractor`](crate::EmbeddingExtractor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Embeddings of different dimension are infinitely far apart, so they
    /// never match and never deduplicate against each other.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// What happened to a candidate embedding offered to a [`PersonEncodingSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Closer than the dedup threshold to an embedding already in the set.
    NearDuplicate,
    /// Dimension differs from the embeddings already stored.
    DimensionMismatch,
}

/// Deduplicated reference embeddings of one person within one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonEncodingSet {
    pub group_id: GroupId,
    pub person_id: PersonId,
    pub embeddings: Vec<Embedding>,
    /// Persisted revision this set was loaded at. `0` means never persisted.
    pub revision: u64,
}

impl PersonEncodingSet {
    pub fn empty(group_id: GroupId, person_id: PersonId) -> Self {
        Self {
            group_id,
            person_id,
            embeddings: Vec::new(),
            revision: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Dimension of the stored embeddings, if any are stored.
    pub fn dim(&self) -> Option<usize> {
        self.embeddings.first().map(Embedding::dim)
    }

    /// Smallest distance from `candidate` to any stored embedding.
    pub fn nearest_distance(&self, candidate: &Embedding) -> Option<f32> {
        self.embeddings
            .iter()
            .map(|e| e.distance(candidate))
            .min_by(f32::total_cmp)
    }

    /// Append `candidate` unless a stored embedding lies strictly closer than
    /// `dedup_threshold`. A distance exactly at the threshold is stored.
    pub fn try_append(&mut self, candidate: Embedding, dedup_threshold: f32) -> AppendOutcome {
        if let Some(dim) = self.dim() {
            if dim != candidate.dim() {
                return AppendOutcome::DimensionMismatch;
            }
        }
        match self.nearest_distance(&candidate) {
            Some(d) if d < dedup_threshold => AppendOutcome::NearDuplicate,
            _ => {
                self.embeddings.push(candidate);
                AppendOutcome::Appended
            }
        }
    }
}

/// A photograph the extractor can read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: ImageId,
    pub path: PathBuf,
}

impl Image {
    pub fn new(id: impl Into<ImageId>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// Present/absent decision for one roster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionOutcome {
    pub person_id: PersonId,
    pub recognized: bool,
}

impl RecognitionOutcome {
    pub fn status(&self) -> &'static str {
        if self.recognized {
            "present"
        } else {
            "absent"
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ThresholdError {
    #[error("{name} must be a positive finite distance, got {value}")]
    Invalid { name: &'static str, value: f32 },
}

/// The two independently tunable distance constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub dedup_threshold: f32,
    pub match_tolerance: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
            match_tolerance: DEFAULT_MATCH_TOLERANCE,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ThresholdError> {
        for (name, value) in [
            ("dedup_threshold", self.dedup_threshold),
            ("match_tolerance", self.match_tolerance),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ThresholdError::Invalid { name, value });
            }
        }
        Ok(())
    }
}
