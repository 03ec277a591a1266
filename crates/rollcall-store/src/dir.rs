//! Directory-of-JSON encoding store.
//!
//! Layout: `<root>/<hex(group)>/<hex(person)>.json`. Records are written to a
//! temporary file in the same directory and renamed over the old one, so a
//! reader sees either the previous record or the new one.

use crate::codec::{self, PackedVectors};
use chrono::{DateTime, Utc};
use rollcall_core::{Embedding, EncodingStore, GroupId, PersonEncodingSet, PersonId, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const RECORD_EXT: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    group_id: GroupId,
    person_id: PersonId,
    revision: u64,
    updated_at: DateTime<Utc>,
    dimension: usize,
    /// SHA-256 of the vectors packed as little-endian f32.
    checksum: String,
    vectors: Vec<Vec<f32>>,
}

enum Stored {
    Missing,
    Corrupt { revision: u64, reason: String },
    Valid(Vec<Embedding>, u64),
}

type KeyLock = Arc<Mutex<()>>;

/// Write ordering is guaranteed within one process: a per-record lock covers
/// the revision check and the rename.
pub struct DirEncodingStore {
    root: PathBuf,
    locks: Mutex<HashMap<(GroupId, PersonId), KeyLock>>,
}

fn io_err(err: std::io::Error) -> StoreError {
    StoreError::backend(err)
}

fn hex(s: &str) -> String {
    s.bytes().map(|b| format!("{b:02x}")).collect()
}

fn unhex(s: &str) -> Option<String> {
    if s.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

impl DirEncodingStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(io_err)?;
        tracing::info!(root = %root.display(), "opened encoding directory");
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn group_dir(&self, group: &GroupId) -> PathBuf {
        self.root.join(hex(group.as_str()))
    }

    fn record_path(&self, group: &GroupId, person: &PersonId) -> PathBuf {
        self.group_dir(group)
            .join(format!("{}.{RECORD_EXT}", hex(person.as_str())))
    }

    fn key_lock(&self, group: &GroupId, person: &PersonId) -> Result<KeyLock, StoreError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StoreError::backend("record lock table poisoned"))?;
        Ok(Arc::clone(
            locks
                .entry((group.clone(), person.clone()))
                .or_default(),
        ))
    }

    fn read(&self, path: &Path) -> Result<Stored, StoreError> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Stored::Missing),
            Err(e) => return Err(io_err(e)),
        };
        let record: Record = match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(e) => {
                return Ok(Stored::Corrupt {
                    revision: 0,
                    reason: e.to_string(),
                })
            }
        };

        let embeddings: Vec<Embedding> = record.vectors.into_iter().map(Embedding::new).collect();
        let verified = codec::pack(&embeddings).and_then(|packed| {
            let declared = PackedVectors {
                dimension: record.dimension,
                ..packed
            };
            codec::unpack(&declared, &record.checksum)
        });
        match verified {
            Ok(embeddings) => Ok(Stored::Valid(embeddings, record.revision)),
            Err(e) => Ok(Stored::Corrupt {
                revision: record.revision,
                reason: e.to_string(),
            }),
        }
    }

    /// Caller holds the record's key lock.
    fn write_record(&self, path: &Path, record: &Record) -> Result<(), StoreError> {
        let dir = self.group_dir(&record.group_id);
        std::fs::create_dir_all(&dir).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        serde_json::to_writer(&mut tmp, record).map_err(StoreError::backend)?;
        tmp.flush().map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    fn load_at(&self, group: &GroupId, person: &PersonId) -> Result<PersonEncodingSet, StoreError> {
        let path = self.record_path(group, person);
        let mut set = PersonEncodingSet::empty(group.clone(), person.clone());
        match self.read(&path)? {
            Stored::Missing => {}
            Stored::Corrupt { revision, reason } => {
                tracing::warn!(%group, %person, path = %path.display(), %reason, "corrupt encoding record; treating as empty");
                set.revision = revision;
            }
            Stored::Valid(embeddings, revision) => {
                set.embeddings = embeddings;
                set.revision = revision;
            }
        }
        Ok(set)
    }
}

impl EncodingStore for DirEncodingStore {
    fn load(&self, group: &GroupId, person: &PersonId) -> Result<PersonEncodingSet, StoreError> {
        self.load_at(group, person)
    }

    fn save(&self, set: &PersonEncodingSet) -> Result<u64, StoreError> {
        let packed = codec::pack(&set.embeddings).map_err(StoreError::backend)?;
        let lock = self.key_lock(&set.group_id, &set.person_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| StoreError::backend("record lock poisoned"))?;

        let path = self.record_path(&set.group_id, &set.person_id);
        let found = match self.read(&path)? {
            Stored::Missing => 0,
            Stored::Corrupt { revision, .. } | Stored::Valid(_, revision) => revision,
        };
        if found != set.revision {
            return Err(StoreError::Conflict {
                group_id: set.group_id.clone(),
                person_id: set.person_id.clone(),
                expected: set.revision,
                found,
            });
        }

        let next = found + 1;
        self.write_record(
            &path,
            &Record {
                group_id: set.group_id.clone(),
                person_id: set.person_id.clone(),
                revision: next,
                updated_at: Utc::now(),
                dimension: packed.dimension,
                checksum: packed.checksum(),
                vectors: set.embeddings.iter().map(|e| e.values.clone()).collect(),
            },
        )?;

        tracing::debug!(group = %set.group_id, person = %set.person_id, revision = next, "saved encoding record");
        Ok(next)
    }

    fn list_persons(&self, group: &GroupId) -> Result<BTreeSet<PersonId>, StoreError> {
        let entries = match std::fs::read_dir(self.group_dir(group)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(io_err(e)),
        };

        let mut persons = BTreeSet::new();
        for entry in entries {
            let path = entry.map_err(io_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(person) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(unhex)
                .map(PersonId::from)
            else {
                continue;
            };
            if let Stored::Valid(embeddings, _) = self.read(&path)? {
                if !embeddings.is_empty() {
                    persons.insert(person);
                }
            }
        }
        Ok(persons)
    }

    fn reset(&self, group: &GroupId, person: &PersonId) -> Result<bool, StoreError> {
        let lock = self.key_lock(group, person)?;
        let _guard = lock
            .lock()
            .map_err(|_| StoreError::backend("record lock poisoned"))?;
        let path = self.record_path(group, person);
        let revision = match self.read(&path)? {
            Stored::Missing => return Ok(false),
            Stored::Valid(embeddings, _) if embeddings.is_empty() => return Ok(false),
            Stored::Valid(_, revision) | Stored::Corrupt { revision, .. } => revision,
        };
        let next = revision + 1;
        self.write_record(
            &path,
            &Record {
                group_id: group.clone(),
                person_id: person.clone(),
                revision: next,
                updated_at: Utc::now(),
                dimension: 0,
                checksum: codec::checksum(&[]),
                vectors: Vec::new(),
            },
        )?;
        tracing::info!(%group, %person, revision = next, "reset reference set");
        Ok(true)
    }
}
