//! SQLite-backed encoding store.

use crate::codec::{self, PackedVectors};
use chrono::Utc;
use rollcall_core::{EncodingStore, GroupId, PersonEncodingSet, PersonId, StoreError};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS encodings (
    group_id   TEXT NOT NULL,
    person_id  TEXT NOT NULL,
    dimension  INTEGER NOT NULL,
    count      INTEGER NOT NULL,
    vectors    BLOB NOT NULL,
    checksum   TEXT NOT NULL,
    revision   INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (group_id, person_id)
);
"#;

/// One row per (group, person). Each operation opens its own connection so the
/// store can be shared across threads; WAL lets readers proceed during a write.
#[derive(Debug, Clone)]
pub struct SqliteEncodingStore {
    db_path: PathBuf,
}

/// Columns are read untyped so a damaged row decodes as corrupt instead of failing.
struct StoredRow {
    dimension: Value,
    count: Value,
    vectors: Value,
    checksum: Value,
    revision: Value,
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::backend(err)
}

fn non_negative(value: &Value) -> Option<u64> {
    match value {
        Value::Integer(v) => u64::try_from(*v).ok(),
        _ => None,
    }
}

/// Revision of an existing row. An unreadable or negative revision counts as 0,
/// which is what `load` reports for it, so a save at that revision repairs the row.
fn stored_revision(value: &Value) -> u64 {
    non_negative(value).unwrap_or(0)
}

impl SqliteEncodingStore {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(StoreError::backend)?;
        }

        let store = Self {
            db_path: path.to_path_buf(),
        };
        let conn = store.connect()?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(backend)?;
        conn.execute_batch(SCHEMA_SQL).map_err(backend)?;

        tracing::info!(path = %path.display(), "opened encoding database");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.db_path).map_err(backend)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(backend)?;
        Ok(conn)
    }

    fn decode_row(group: &GroupId, person: &PersonId, row: StoredRow) -> PersonEncodingSet {
        let mut set = PersonEncodingSet::empty(group.clone(), person.clone());
        let Some(revision) = non_negative(&row.revision) else {
            tracing::warn!(%group, %person, stored = ?row.revision, "corrupt encoding record: bad revision; treating as empty");
            return set;
        };
        set.revision = revision;

        let shape = non_negative(&row.dimension)
            .zip(non_negative(&row.count))
            .and_then(|(d, c)| usize::try_from(d).ok().zip(usize::try_from(c).ok()));
        let (Some((dimension, count)), Value::Blob(bytes), Value::Text(checksum)) =
            (shape, row.vectors, row.checksum)
        else {
            tracing::warn!(%group, %person, revision, "corrupt encoding record: unreadable columns; treating as empty");
            return set;
        };
        let packed = PackedVectors {
            dimension,
            count,
            bytes,
        };
        match codec::unpack(&packed, &checksum) {
            Ok(embeddings) => set.embeddings = embeddings,
            Err(e) => {
                tracing::warn!(%group, %person, revision, error = %e, "corrupt encoding record; treating as empty");
            }
        }
        set
    }
}

impl EncodingStore for SqliteEncodingStore {
    fn load(&self, group: &GroupId, person: &PersonId) -> Result<PersonEncodingSet, StoreError> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT dimension, count, vectors, checksum, revision FROM encodings
                 WHERE group_id = ?1 AND person_id = ?2",
                params![group.as_str(), person.as_str()],
                |r| {
                    Ok(StoredRow {
                        dimension: r.get(0)?,
                        count: r.get(1)?,
                        vectors: r.get(2)?,
                        checksum: r.get(3)?,
                        revision: r.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(backend)?;

        Ok(match row {
            None => PersonEncodingSet::empty(group.clone(), person.clone()),
            Some(row) => Self::decode_row(group, person, row),
        })
    }

    fn save(&self, set: &PersonEncodingSet) -> Result<u64, StoreError> {
        let packed = codec::pack(&set.embeddings).map_err(StoreError::backend)?;
        let dimension = i64::try_from(packed.dimension).map_err(StoreError::backend)?;
        let count = i64::try_from(packed.count).map_err(StoreError::backend)?;
        let checksum = packed.checksum();

        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;

        let found = tx
            .query_row(
                "SELECT revision FROM encodings WHERE group_id = ?1 AND person_id = ?2",
                params![set.group_id.as_str(), set.person_id.as_str()],
                |r| r.get::<_, Value>(0),
            )
            .optional()
            .map_err(backend)?
            .map_or(0, |v| stored_revision(&v));
        if found != set.revision {
            return Err(StoreError::Conflict {
                group_id: set.group_id.clone(),
                person_id: set.person_id.clone(),
                expected: set.revision,
                found,
            });
        }

        let next = found + 1;
        let next_db = i64::try_from(next).map_err(StoreError::backend)?;
        tx.execute(
            "INSERT INTO encodings
                 (group_id, person_id, dimension, count, vectors, checksum, revision, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (group_id, person_id) DO UPDATE SET
                 dimension = excluded.dimension,
                 count = excluded.count,
                 vectors = excluded.vectors,
                 checksum = excluded.checksum,
                 revision = excluded.revision,
                 updated_at = excluded.updated_at",
            params![
                set.group_id.as_str(),
                set.person_id.as_str(),
                dimension,
                count,
                packed.bytes,
                checksum,
                next_db,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(backend)?;
        tx.commit().map_err(backend)?;

        tracing::debug!(group = %set.group_id, person = %set.person_id, revision = next, count = packed.count, "saved encoding record");
        Ok(next)
    }

    fn list_persons(&self, group: &GroupId) -> Result<BTreeSet<PersonId>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT person_id FROM encodings WHERE group_id = ?1 AND count > 0")
            .map_err(backend)?;
        let persons = stmt
            .query_map(params![group.as_str()], |r| r.get::<_, String>(0))
            .map_err(backend)?
            .map(|r| r.map(PersonId::from).map_err(backend))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(persons)
    }

    /// Leaves an empty row behind so the revision keeps counting up.
    fn reset(&self, group: &GroupId, person: &PersonId) -> Result<bool, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;

        let existing = tx
            .query_row(
                "SELECT count, revision FROM encodings WHERE group_id = ?1 AND person_id = ?2",
                params![group.as_str(), person.as_str()],
                |r| Ok((r.get::<_, Value>(0)?, r.get::<_, Value>(1)?)),
            )
            .optional()
            .map_err(backend)?;
        let revision = match existing {
            None => return Ok(false),
            Some((Value::Integer(0), revision)) if non_negative(&revision).is_some() => return Ok(false),
            Some((_, revision)) => stored_revision(&revision),
        };

        let next = revision + 1;
        let next_db = i64::try_from(next).map_err(StoreError::backend)?;
        tx.execute(
            "UPDATE encodings
             SET dimension = 0, count = 0, vectors = ?3, checksum = ?4, revision = ?5, updated_at = ?6
             WHERE group_id = ?1 AND person_id = ?2",
            params![
                group.as_str(),
                person.as_str(),
                Vec::<u8>::new(),
                codec::checksum(&[]),
                next_db,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(backend)?;
        tx.commit().map_err(backend)?;

        tracing::info!(%group, %person, revision = next, "reset reference set");
        Ok(true)
    }
}
