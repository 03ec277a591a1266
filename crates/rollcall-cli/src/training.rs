//! Training directory scan and the per-group processed-image ledger.
//!
//! Layout: `<training_dir>/<group>/<person>/<image>`. The ledger lives at
//! `<training_dir>/<group>/.rollcall-processed.json` and lists the image ids
//! that have already been folded into the store.

use anyhow::{Context, Result};
use rollcall_core::{GroupId, Image, ImageId, PersonId};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::sidecar::is_sidecar;

const LEDGER_FILE: &str = ".rollcall-processed.json";

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("cannot read {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("cannot list {}", dir.display()))?;
    entries.retain(|p| !is_hidden(p));
    entries.sort();
    Ok(entries)
}

/// Every person folder of `group` with its reference images, sorted by name.
///
/// Image ids are `<person>/<file name>` so they stay unique across the group.
pub fn scan(training_dir: &Path, group: &GroupId) -> Result<Vec<(PersonId, Vec<Image>)>> {
    let group_dir = training_dir.join(group.as_str());
    let mut persons = Vec::new();
    for person_dir in sorted_entries(&group_dir)? {
        if !person_dir.is_dir() {
            continue;
        }
        let Some(person) = person_dir.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!(path = %person_dir.display(), "skipping non-UTF-8 person folder");
            continue;
        };
        let mut images = Vec::new();
        for path in sorted_entries(&person_dir)? {
            if !path.is_file() || is_sidecar(&path) {
                continue;
            }
            let Some(file) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            images.push(Image::new(format!("{person}/{file}"), path.clone()));
        }
        persons.push((PersonId::from(person), images));
    }
    Ok(persons)
}

/// Image ids already processed for one group.
#[derive(Debug)]
pub struct ProcessedLedger {
    path: PathBuf,
    seen: BTreeSet<ImageId>,
}

impl ProcessedLedger {
    pub fn load(training_dir: &Path, group: &GroupId) -> Result<Self> {
        let path = training_dir.join(group.as_str()).join(LEDGER_FILE);
        let seen = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt ledger {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(e).with_context(|| format!("cannot read {}", path.display())),
        };
        Ok(Self { path, seen })
    }

    pub fn contains(&self, id: &ImageId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn extend(&mut self, ids: impl IntoIterator<Item = ImageId>) {
        self.seen.extend(ids);
    }

    pub fn save(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .context("ledger path has no parent directory")?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("cannot create temp file in {}", dir.display()))?;
        serde_json::to_writer_pretty(&mut tmp, &self.seen)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .with_context(|| format!("cannot write {}", self.path.display()))?;
        Ok(())
    }
}
