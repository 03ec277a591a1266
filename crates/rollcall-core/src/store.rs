//! Encoding store seam and an in-memory implementation.

use crate::types::{GroupId, PersonEncodingSet, PersonId};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("write conflict for {group_id}/{person_id}: expected revision {expected}, found {found}")]
    Conflict {
        group_id: GroupId,
        person_id: PersonId,
        expected: u64,
        found: u64,
    },
    #[error("store backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Backend(err.into())
    }
}

/// Durable per-(group, person) persistence of reference embeddings.
///
/// Sharing discipline is many readers, single writer per key: `save` is a
/// compare-and-swap on [`PersonEncodingSet::revision`].
pub trait EncodingStore: Send + Sync {
    /// Load a person's set. Missing records yield an empty set with revision 0.
    /// Corrupt records yield an empty set at the record's revision and log a
    /// warning. Only backend failures are errors.
    fn load(&self, group: &GroupId, person: &PersonId) -> Result<PersonEncodingSet, StoreError>;

    /// Atomically replace the persisted set if its revision still equals
    /// `set.revision`. Returns the new revision.
    fn save(&self, set: &PersonEncodingSet) -> Result<u64, StoreError>;

    /// Everyone with at least one stored embedding in `group`.
    fn list_persons(&self, group: &GroupId) -> Result<BTreeSet<PersonId>, StoreError>;

    /// Clear a person's embeddings. The record stays behind, empty, at the next
    /// revision, so a writer still holding a pre-reset revision gets a
    /// `Conflict` instead of resurrecting old data. Returns whether anything
    /// was cleared.
    fn reset(&self, group: &GroupId, person: &PersonId) -> Result<bool, StoreError>;
}

/// Process-local store, partitioned by group.
#[derive(Default)]
pub struct MemoryEncodingStore {
    groups: RwLock<HashMap<GroupId, HashMap<PersonId, PersonEncodingSet>>>,
}

impl MemoryEncodingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::backend("memory store lock poisoned")
}

impl EncodingStore for MemoryEncodingStore {
    fn load(&self, group: &GroupId, person: &PersonId) -> Result<PersonEncodingSet, StoreError> {
        let groups = self.groups.read().map_err(poisoned)?;
        Ok(groups
            .get(group)
            .and_then(|g| g.get(person))
            .cloned()
            .unwrap_or_else(|| PersonEncodingSet::empty(group.clone(), person.clone())))
    }

    fn save(&self, set: &PersonEncodingSet) -> Result<u64, StoreError> {
        let mut groups = self.groups.write().map_err(poisoned)?;
        let persons = groups.entry(set.group_id.clone()).or_default();
        let found = persons.get(&set.person_id).map_or(0, |s| s.revision);
        if found != set.revision {
            return Err(StoreError::Conflict {
                group_id: set.group_id.clone(),
                person_id: set.person_id.clone(),
                expected: set.revision,
                found,
            });
        }
        let mut stored = set.clone();
        stored.revision = found + 1;
        persons.insert(set.person_id.clone(), stored);
        Ok(found + 1)
    }

    fn list_persons(&self, group: &GroupId) -> Result<BTreeSet<PersonId>, StoreError> {
        let groups = self.groups.read().map_err(poisoned)?;
        Ok(groups
            .get(group)
            .map(|g| {
                g.values()
                    .filter(|s| !s.is_empty())
                    .map(|s| s.person_id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn reset(&self, group: &GroupId, person: &PersonId) -> Result<bool, StoreError> {
        let mut groups = self.groups.write().map_err(poisoned)?;
        let Some(set) = groups
            .get_mut(group)
            .and_then(|g| g.get_mut(person))
            .filter(|s| !s.is_empty())
        else {
            return Ok(false);
        };
        set.embeddings.clear();
        set.revision += 1;
        Ok(true)
    }
}
