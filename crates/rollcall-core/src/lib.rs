//! rollcall-core — Face-based attendance taking.
//!
//! Keeps per-group reference embeddings for each enrolled person, matches
//! faces from attendance photos against them and reconciles the result with
//! the full roster. Face detection and embedding models plug in through
//! [`EmbeddingExtractor`].

pub mod attendance;
pub mod builder;
pub mod extractor;
pub mod matcher;
pub mod reconciler;
pub mod roster;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use attendance::{AttendanceError, AttendanceService, AttendanceSheet};
pub use builder::{BuildError, BuildOutcome, EncodingBuilder};
pub use extractor::{EmbeddingExtractor, ExtractError};
pub use matcher::{EuclideanMatcher, IdentityMatcher, MatchError, MatchResult, Matcher};
pub use reconciler::reconcile;
pub use roster::{RosterError, RosterProvider, StaticRoster, StoreRoster};
pub use store::{EncodingStore, MemoryEncodingStore, StoreError};
pub use types::{
    Embedding, GroupId, Image, ImageId, PersonEncodingSet, PersonId, RecognitionOutcome,
    ThresholdError, Thresholds, DEFAULT_DEDUP_THRESHOLD, DEFAULT_MATCH_TOLERANCE,
};
