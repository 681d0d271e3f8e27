//! # redb-backed Quad Storage
//!
//! A disk-backed quad store using the redb embedded database.
//!
//! The resource graph keeps its working indices in memory and uses this
//! store only as a durable log of quads:
//! - Every commit is written as one redb write transaction
//! - On open, every quad is read back to rebuild the in-memory indices
//! - A small metadata table carries engine bookkeeping (the extraction journal)
//!
//! Objects are postcard-encoded so that integers, booleans and URIs keep
//! their type across restarts.

use crate::types::{GraphName, Quad, QuarryError, Term, Uri};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::{Path, PathBuf};

/// Table for quads: (graph, subject, predicate, encoded object) -> ()
const QUADS: TableDefinition<(&str, &str, &str, &[u8]), ()> = TableDefinition::new("quads");

/// Table for metadata: key string -> raw bytes
const METADATA: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

/// Metadata key for the on-disk layout version.
const LAYOUT_VERSION_KEY: &str = "layout_version";

/// Current on-disk layout version.
const LAYOUT_VERSION: u8 = 1;

/// A disk-backed quad store using redb.
pub struct RedbStore {
    /// The redb database handle.
    db: Database,
    /// Location of the database file.
    path: PathBuf,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a quad database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `QuarryError::Corrupted` when the file is not a redb database,
    /// fails redb's integrity checks, or makes redb panic while opening.
    /// Every other failure is `QuarryError::Storage`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QuarryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        contain_panic("open", || Self::create(path))
    }

    fn create(path: PathBuf) -> Result<Self, QuarryError> {
        let db = match Database::create(&path) {
            Ok(db) => db,
            Err(redb::DatabaseError::Storage(e)) => return Err(storage_error(e)),
            Err(e) => return Err(QuarryError::Storage(e.to_string())),
        };

        // Initialize tables if they don't exist
        {
            let write_txn = db
                .begin_write()
                .map_err(|e| QuarryError::Storage(e.to_string()))?;
            let _ = write_txn
                .open_table(QUADS)
                .map_err(|e| QuarryError::Storage(e.to_string()))?;
            {
                let mut meta = write_txn
                    .open_table(METADATA)
                    .map_err(|e| QuarryError::Storage(e.to_string()))?;
                let existing = meta
                    .get(LAYOUT_VERSION_KEY)
                    .map_err(|e| QuarryError::Storage(e.to_string()))?
                    .map(|v| v.value().to_vec());
                match existing.as_deref() {
                    None => {
                        meta.insert(LAYOUT_VERSION_KEY, [LAYOUT_VERSION].as_slice())
                            .map_err(|e| QuarryError::Storage(e.to_string()))?;
                    }
                    Some([LAYOUT_VERSION]) => {}
                    Some(other) => {
                        return Err(QuarryError::Corrupted(format!(
                            "unknown layout version {:?}",
                            other
                        )));
                    }
                }
            }
            write_txn
                .commit()
                .map_err(|e| QuarryError::Storage(e.to_string()))?;
        }

        Ok(Self { db, path })
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every stored quad.
    ///
    /// A panic inside redb while walking the table is reported as
    /// `QuarryError::Corrupted`.
    pub fn load(&self) -> Result<Vec<Quad>, QuarryError> {
        contain_panic("load", || self.read_quads())
    }

    fn read_quads(&self) -> Result<Vec<Quad>, QuarryError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| QuarryError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(QUADS)
            .map_err(|e| QuarryError::Storage(e.to_string()))?;

        let mut quads = Vec::with_capacity(
            table
                .len()
                .map_err(|e| QuarryError::Storage(e.to_string()))? as usize,
        );
        for entry in table
            .iter()
            .map_err(|e| QuarryError::Storage(e.to_string()))?
        {
            let (key, _) = entry.map_err(|e| QuarryError::Storage(e.to_string()))?;
            let (graph, subject, predicate, object) = key.value();
            let object: Term = postcard::from_bytes(object)
                .map_err(|e| QuarryError::Corrupted(format!("undecodable object: {}", e)))?;
            quads.push(Quad {
                graph: GraphName::new(graph),
                subject: Uri::new(subject),
                predicate: Uri::new(predicate),
                object,
            });
        }
        Ok(quads)
    }

    /// Persist one commit: removals first, then additions, in one transaction.
    pub fn apply(&self, added: &[Quad], removed: &[Quad]) -> Result<(), QuarryError> {
        if added.is_empty() && removed.is_empty() {
            return Ok(());
        }

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| QuarryError::Storage(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(QUADS)
                .map_err(|e| QuarryError::Storage(e.to_string()))?;

            for quad in removed {
                let object = encode_term(&quad.object)?;
                table
                    .remove((
                        quad.graph.as_str(),
                        quad.subject.as_str(),
                        quad.predicate.as_str(),
                        object.as_slice(),
                    ))
                    .map_err(|e| QuarryError::Storage(e.to_string()))?;
            }
            for quad in added {
                let object = encode_term(&quad.object)?;
                table
                    .insert(
                        (
                            quad.graph.as_str(),
                            quad.subject.as_str(),
                            quad.predicate.as_str(),
                            object.as_slice(),
                        ),
                        (),
                    )
                    .map_err(|e| QuarryError::Storage(e.to_string()))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| QuarryError::Storage(e.to_string()))
    }

    /// Number of stored quads.
    pub fn len(&self) -> Result<u64, QuarryError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| QuarryError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(QUADS)
            .map_err(|e| QuarryError::Storage(e.to_string()))?;
        table
            .len()
            .map_err(|e| QuarryError::Storage(e.to_string()))
    }

    /// Whether the store holds no quads.
    pub fn is_empty(&self) -> Result<bool, QuarryError> {
        Ok(self.len()? == 0)
    }

    /// Read a metadata value.
    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, QuarryError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| QuarryError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(METADATA)
            .map_err(|e| QuarryError::Storage(e.to_string()))?;
        Ok(table
            .get(key)
            .map_err(|e| QuarryError::Storage(e.to_string()))?
            .map(|v| v.value().to_vec()))
    }

    /// Write or clear a metadata value.
    pub fn set_meta(&self, key: &str, value: Option<&[u8]>) -> Result<(), QuarryError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| QuarryError::Storage(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(METADATA)
                .map_err(|e| QuarryError::Storage(e.to_string()))?;
            match value {
                Some(bytes) => {
                    table
                        .insert(key, bytes)
                        .map_err(|e| QuarryError::Storage(e.to_string()))?;
                }
                None => {
                    table
                        .remove(key)
                        .map_err(|e| QuarryError::Storage(e.to_string()))?;
                }
            }
        }
        write_txn
            .commit()
            .map_err(|e| QuarryError::Storage(e.to_string()))
    }

    /// Move a corrupt database file aside so a fresh one can be created.
    ///
    /// Returns the path the old file was moved to.
    pub fn quarantine(path: impl AsRef<Path>) -> Result<PathBuf, QuarryError> {
        let path = path.as_ref();
        let mut target = path.as_os_str().to_owned();
        target.push(".corrupt");
        let target = PathBuf::from(target);
        std::fs::rename(path, &target)?;
        Ok(target)
    }
}

/// Map a redb storage error, treating integrity failures as corruption.
fn storage_error(e: redb::StorageError) -> QuarryError {
    match e {
        redb::StorageError::Corrupted(msg) => QuarryError::Corrupted(msg),
        redb::StorageError::Io(io) if io.kind() == std::io::ErrorKind::InvalidData => {
            QuarryError::Corrupted(io.to_string())
        }
        other => QuarryError::Storage(other.to_string()),
    }
}

/// Run a redb operation, turning a panic into `QuarryError::Corrupted`.
///
/// redb asserts on page layouts it reads back, so a damaged file can panic
/// instead of returning an error.
fn contain_panic<T>(
    op: &str,
    f: impl FnOnce() -> Result<T, QuarryError>,
) -> Result<T, QuarryError> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(op, panic = %msg, "redb panicked");
            Err(QuarryError::Corrupted(format!("redb panicked during {op}: {msg}")))
        }
    }
}

fn encode_term(term: &Term) -> Result<Vec<u8>, QuarryError> {
    postcard::to_allocvec(term).map_err(|e| QuarryError::SerializationError(e.to_string()))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn quad(s: &str, p: &str, o: Term) -> Quad {
        Quad {
            graph: GraphName::new("quarry:FileSystem"),
            subject: Uri::new(s),
            predicate: Uri::new(p),
            object: o,
        }
    }

    #[test]
    fn quads_survive_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("index.db");

        {
            let store = RedbStore::open(&path).expect("open");
            store
                .apply(
                    &[
                        quad("file:///a", "nfo:fileSize", Term::Integer(12)),
                        quad("file:///a", "quarry:available", Term::Boolean(true)),
                    ],
                    &[],
                )
                .expect("apply");
        }

        let store = RedbStore::open(&path).expect("reopen");
        let mut loaded = store.load().expect("load");
        loaded.sort();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].object, Term::Integer(12));
        assert_eq!(loaded[1].object, Term::Boolean(true));
    }

    #[test]
    fn removal_and_insert_in_one_commit() {
        let dir = tempdir().expect("tempdir");
        let store = RedbStore::open(dir.path().join("index.db")).expect("open");
        let old = quad("file:///a", "nie:title", Term::literal("old"));
        let new = quad("file:///a", "nie:title", Term::literal("new"));

        store.apply(&[old.clone()], &[]).expect("insert");
        store.apply(&[new.clone()], &[old]).expect("replace");

        assert_eq!(store.load().expect("load"), vec![new]);
        assert_eq!(store.len().expect("len"), 1);
    }

    #[test]
    fn metadata_set_and_clear() {
        let dir = tempdir().expect("tempdir");
        let store = RedbStore::open(dir.path().join("index.db")).expect("open");

        store.set_meta("k", Some(b"v")).expect("set");
        assert_eq!(store.get_meta("k").expect("get"), Some(b"v".to_vec()));
        store.set_meta("k", None).expect("clear");
        assert_eq!(store.get_meta("k").expect("get"), None);
    }

    #[test]
    fn quarantine_moves_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("index.db");
        std::fs::write(&path, b"garbage").expect("write");

        let moved = RedbStore::quarantine(&path).expect("quarantine");
        assert!(!path.exists());
        assert!(moved.exists());
    }
}
