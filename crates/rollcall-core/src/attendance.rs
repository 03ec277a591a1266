//! Attendance taking: roster lookup, matching and reconciliation.

use crate::extractor::EmbeddingExtractor;
use crate::matcher::{IdentityMatcher, MatchError};
use crate::reconciler::reconcile;
use crate::roster::{RosterError, RosterProvider};
use crate::store::EncodingStore;
use crate::types::{GroupId, Image, PersonId, RecognitionOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Roster(#[from] RosterError),
}

impl AttendanceError {
    /// Whether the caller should be asked for a clearer photo.
    pub fn is_unclear_image(&self) -> bool {
        matches!(self, Self::Match(MatchError::UnclearImage { .. }))
    }
}

/// Complete present/absent list for one attendance request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceSheet {
    pub group_id: GroupId,
    pub taken_at: DateTime<Utc>,
    pub outcomes: Vec<RecognitionOutcome>,
}

impl AttendanceSheet {
    pub fn present(&self) -> impl Iterator<Item = &PersonId> {
        self.outcomes.iter().filter(|o| o.recognized).map(|o| &o.person_id)
    }

    pub fn absent(&self) -> impl Iterator<Item = &PersonId> {
        self.outcomes.iter().filter(|o| !o.recognized).map(|o| &o.person_id)
    }
}

pub struct AttendanceService<'a> {
    store: &'a dyn EncodingStore,
    extractor: &'a dyn EmbeddingExtractor,
    roster: &'a dyn RosterProvider,
    match_tolerance: f32,
}

impl<'a> AttendanceService<'a> {
    pub fn new(
        store: &'a dyn EncodingStore,
        extractor: &'a dyn EmbeddingExtractor,
        roster: &'a dyn RosterProvider,
        match_tolerance: f32,
    ) -> Self {
        Self {
            store,
            extractor,
            roster,
            match_tolerance,
        }
    }

    /// Recognize faces in `photos` and report every roster member.
    ///
    /// An unclear photo rejects the request before any outcome is produced.
    pub fn take_attendance(
        &self,
        group: &GroupId,
        photos: &[Image],
    ) -> Result<AttendanceSheet, AttendanceError> {
        let roster = self.roster.roster_of(group)?;
        let matcher = IdentityMatcher::new(self.store, self.extractor, self.match_tolerance);
        let recognized = matcher.match_photos(group, photos)?;
        let outcomes = reconcile(&roster, &recognized);

        tracing::info!(
            %group,
            photos = photos.len(),
            roster = outcomes.len(),
            present = outcomes.iter().filter(|o| o.recognized).count(),
            "attendance taken"
        );

        Ok(AttendanceSheet {
            group_id: group.clone(),
            taken_at: Utc::now(),
            outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::{StaticRoster, StoreRoster};
    use crate::store::MemoryEncodingStore;
    use crate::test_support::{image, FixtureExtractor};
    use crate::types::{Embedding, PersonEncodingSet};

    fn enroll(store: &MemoryEncodingStore, person: &str, refs: &[&[f32]]) {
        let mut set = PersonEncodingSet::empty("g".into(), person.into());
        set.embeddings = refs.iter().map(|v| Embedding::new(v.to_vec())).collect();
        store.save(&set).unwrap();
    }

    fn ids<'s>(iter: impl Iterator<Item = &'s PersonId>) -> Vec<&'s str> {
        iter.map(PersonId::as_str).collect()
    }

    #[test]
    fn test_unenrolled_roster_members_reported_absent() {
        let store = MemoryEncodingStore::new();
        enroll(&store, "S1", &[&[0.0, 0.0]]);
        let extractor = FixtureExtractor::new().with_faces("room", &[&[0.05, 0.0]]);
        let roster = StaticRoster::new().with_group("g", vec!["S1".into(), "S2".into(), "S3".into()]);

        let service = AttendanceService::new(&store, &extractor, &roster, 0.6);
        let sheet = service.take_attendance(&"g".into(), &[image("room")]).unwrap();

        assert_eq!(ids(sheet.present()), vec!["S1"]);
        assert_eq!(ids(sheet.absent()), vec!["S2", "S3"]);
    }

    #[test]
    fn test_unclear_photo_produces_no_sheet() {
        let store = MemoryEncodingStore::new();
        enroll(&store, "S1", &[&[0.0, 0.0]]);
        let extractor = FixtureExtractor::new();
        let roster = StaticRoster::new().with_group("g", vec!["S1".into()]);

        let service = AttendanceService::new(&store, &extractor, &roster, 0.6);
        let err = service.take_attendance(&"g".into(), &[image("dark")]).unwrap_err();
        assert!(err.is_unclear_image());
    }

    #[test]
    fn test_unknown_roster_group_fails() {
        let store = MemoryEncodingStore::new();
        let extractor = FixtureExtractor::new().with_faces("room", &[&[0.0]]);
        let roster = StaticRoster::new();

        let service = AttendanceService::new(&store, &extractor, &roster, 0.6);
        let err = service.take_attendance(&"g".into(), &[image("room")]).unwrap_err();
        assert!(matches!(err, AttendanceError::Roster(RosterError::UnknownGroup(_))));
        assert!(!err.is_unclear_image());
    }

    #[test]
    fn test_store_roster_fallback() {
        let store = MemoryEncodingStore::new();
        enroll(&store, "S1", &[&[0.0, 0.0]]);
        enroll(&store, "S2", &[&[3.0, 3.0]]);
        let extractor = FixtureExtractor::new().with_faces("room", &[&[3.0, 3.1]]);
        let roster = StoreRoster::new(&store);

        let service = AttendanceService::new(&store, &extractor, &roster, 0.6);
        let sheet = service.take_attendance(&"g".into(), &[image("room")]).unwrap();
        let flat: Vec<_> = sheet
            .outcomes
            .iter()
            .map(|o| (o.person_id.as_str(), o.status()))
            .collect();
        assert_eq!(flat, vec![("S1", "absent"), ("S2", "present")]);
    }

    #[test]
    fn test_sheet_serializes_outcomes() {
        let sheet = AttendanceSheet {
            group_id: "g".into(),
            taken_at: Utc::now(),
            outcomes: vec![RecognitionOutcome { person_id: "S1".into(), recognized: true }],
        };
        let json = serde_json::to_value(&sheet).unwrap();
        assert_eq!(json["group_id"], "g");
        assert_eq!(json["outcomes"][0]["person_id"], "S1");
        assert_eq!(json["outcomes"][0]["recognized"], true);
    }
}
