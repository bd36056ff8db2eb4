//! # redb-backed Document Storage
//!
//! A disk-backed document store using the redb embedded database:
//! - ACID transactions (one per write)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Documents live in one table keyed by `(collection, storage key)`, so a
//! collection scan is a single key range.

use super::{DocumentStore, Record};
use crate::primitives::RECORD_VERSION;
use crate::types::{DocId, DocjsonError};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Table for documents: (collection, storage key) -> postcard `StoredRecord`
const DOCUMENTS: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("documents");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// On-disk envelope of a record.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    version: u8,
    record: Record,
}

fn io_err(e: impl std::fmt::Display) -> DocjsonError {
    DocjsonError::IoError(e.to_string())
}

fn sequence_key(collection: &str) -> String {
    format!("next_id:{}", collection)
}

fn decode_stored(bytes: &[u8]) -> Result<Record, DocjsonError> {
    let stored: StoredRecord =
        postcard::from_bytes(bytes).map_err(|e| DocjsonError::SerializationError(e.to_string()))?;
    if stored.version != RECORD_VERSION {
        return Err(DocjsonError::SerializationError(format!(
            "unsupported record version {} (expected {})",
            stored.version, RECORD_VERSION
        )));
    }
    Ok(stored.record)
}

/// A disk-backed document store using redb.
pub struct RedbStore {
    /// The redb database handle.
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a document database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DocjsonError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(DOCUMENTS).map_err(io_err)?;
            let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        tracing::info!(path = %path.as_ref().display(), "opened redb document store");
        Ok(Self { db })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), DocjsonError> {
        self.db.compact().map_err(io_err)?;
        Ok(())
    }
}

// =============================================================================
// DOCUMENTSTORE TRAIT IMPLEMENTATION
// =============================================================================

impl DocumentStore for RedbStore {
    fn put(&mut self, collection: &str, record: Record) -> Result<(), DocjsonError> {
        let key = record.id.storage_key();
        let explicit_sequence = match record.id {
            DocId::Int(n) => u64::try_from(n).ok(),
            _ => None,
        };
        let bytes = postcard::to_allocvec(&StoredRecord {
            version: RECORD_VERSION,
            record,
        })
        .map_err(|e| DocjsonError::SerializationError(e.to_string()))?;

        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(DOCUMENTS).map_err(io_err)?;
            table
                .insert((collection, key.as_str()), bytes.as_slice())
                .map_err(io_err)?;
        }
        if let Some(explicit) = explicit_sequence {
            let seq_key = sequence_key(collection);
            let mut table = write_txn.open_table(METADATA).map_err(io_err)?;
            let current = table
                .get(seq_key.as_str())
                .map_err(io_err)?
                .map(|v| v.value())
                .unwrap_or(0);
            if explicit > current {
                table.insert(seq_key.as_str(), explicit).map_err(io_err)?;
            }
        }
        write_txn.commit().map_err(io_err)?;
        Ok(())
    }

    fn get(&self, collection: &str, id: &DocId) -> Result<Option<Record>, DocjsonError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(DOCUMENTS).map_err(io_err)?;
        let key = id.storage_key();

        match table.get((collection, key.as_str())).map_err(io_err)? {
            Some(data) => Ok(Some(decode_stored(data.value())?)),
            None => Ok(None),
        }
    }

    fn remove(&mut self, collection: &str, id: &DocId) -> Result<bool, DocjsonError> {
        let key = id.storage_key();
        let write_txn = self.db.begin_write().map_err(io_err)?;
        let removed = {
            let mut table = write_txn.open_table(DOCUMENTS).map_err(io_err)?;
            table
                .remove((collection, key.as_str()))
                .map_err(io_err)?
                .is_some()
        };
        write_txn.commit().map_err(io_err)?;
        Ok(removed)
    }

    fn records(&self, collection: &str) -> Result<Vec<Record>, DocjsonError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(DOCUMENTS).map_err(io_err)?;

        let mut records = Vec::new();
        for entry in table.range((collection, "")..).map_err(io_err)? {
            let (key, value) = entry.map_err(io_err)?;
            if key.value().0 != collection {
                break;
            }
            records.push(decode_stored(value.value())?);
        }
        Ok(records)
    }

    fn count(&self, collection: &str) -> Result<usize, DocjsonError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(DOCUMENTS).map_err(io_err)?;

        let mut count = 0;
        for entry in table.range((collection, "")..).map_err(io_err)? {
            let (key, _) = entry.map_err(io_err)?;
            if key.value().0 != collection {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    fn collections(&self) -> Result<Vec<String>, DocjsonError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(DOCUMENTS).map_err(io_err)?;

        let mut names = BTreeSet::new();
        for entry in table.iter().map_err(io_err)? {
            let (key, _) = entry.map_err(io_err)?;
            names.insert(key.value().0.to_string());
        }
        Ok(names.into_iter().collect())
    }

    fn next_sequence(&mut self, collection: &str) -> Result<i64, DocjsonError> {
        let key = sequence_key(collection);
        let write_txn = self.db.begin_write().map_err(io_err)?;
        let next = {
            let mut table = write_txn.open_table(METADATA).map_err(io_err)?;
            let current = table
                .get(key.as_str())
                .map_err(io_err)?
                .map(|v| v.value())
                .unwrap_or(0);
            let next = current.saturating_add(1);
            table.insert(key.as_str(), next).map_err(io_err)?;
            next
        };
        write_txn.commit().map_err(io_err)?;
        i64::try_from(next).map_err(|e| DocjsonError::SerializationError(e.to_string()))
    }
}
