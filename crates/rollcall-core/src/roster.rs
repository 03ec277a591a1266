//! Roster providers: who is expected in a group at attendance time.

use crate::store::EncodingStore;
use crate::types::{GroupId, PersonId};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("no roster for group {0}")]
    UnknownGroup(GroupId),
    #[error("roster backend: {0}")]
    Backend(String),
}

pub trait RosterProvider: Send + Sync {
    fn roster_of(&self, group: &GroupId) -> Result<Vec<PersonId>, RosterError>;
}

/// Fixed in-memory rosters.
#[derive(Debug, Default, Clone)]
pub struct StaticRoster {
    groups: HashMap<GroupId, Vec<PersonId>>,
}

impl StaticRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: impl Into<GroupId>, persons: Vec<PersonId>) -> Self {
        self.groups.insert(group.into(), persons);
        self
    }
}

impl RosterProvider for StaticRoster {
    fn roster_of(&self, group: &GroupId) -> Result<Vec<PersonId>, RosterError> {
        self.groups
            .get(group)
            .cloned()
            .ok_or_else(|| RosterError::UnknownGroup(group.clone()))
    }
}

/// Treats everyone with stored encodings as the expected population.
///
/// People enrolled without any processed reference image are invisible to
/// this provider; prefer a real roster when one is available.
pub struct StoreRoster<'a> {
    store: &'a dyn EncodingStore,
}

impl<'a> StoreRoster<'a> {
    pub fn new(store: &'a dyn EncodingStore) -> Self {
        Self { store }
    }
}

impl RosterProvider for StoreRoster<'_> {
    fn roster_of(&self, group: &GroupId) -> Result<Vec<PersonId>, RosterError> {
        self.store
            .list_persons(group)
            .map(|persons| persons.into_iter().collect())
            .map_err(|e| RosterError::Backend(e.to_string()))
    }
}
