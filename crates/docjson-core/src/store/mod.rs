//! # Storage Collaborator
//!
//! The persistence interface the graph engine calls out to, plus two backends:
//! - `MemoryStore`: `BTreeMap`-backed, deterministic ordering
//! - `RedbStore`: disk-backed via redb (ACID per write)
//!
//! A stored document is a `Record`: its identifier and the Extended JSON
//! rendering of its storage mapping.

mod redb_store;

pub use redb_store::RedbStore;

use crate::types::{DocId, DocjsonError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// RECORD
// =============================================================================

/// A persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: DocId,
    /// Extended JSON body, `_id` first.
    pub body: String,
}

// =============================================================================
// DOCUMENTSTORE TRAIT
// =============================================================================

/// Document persistence.
///
/// All fallible operations return `Result<T, DocjsonError>` so that in-memory
/// and persistent backends are interchangeable. Retries, if any, belong to
/// implementations; callers surface errors as-is.
pub trait DocumentStore {
    /// Insert or replace a record.
    fn put(&mut self, collection: &str, record: Record) -> Result<(), DocjsonError>;

    /// Fetch a record by identifier.
    fn get(&self, collection: &str, id: &DocId) -> Result<Option<Record>, DocjsonError>;

    /// Delete a record. Returns whether it existed.
    fn remove(&mut self, collection: &str, id: &DocId) -> Result<bool, DocjsonError>;

    /// All records of a collection in storage-key order.
    fn records(&self, collection: &str) -> Result<Vec<Record>, DocjsonError>;

    /// Number of records in a collection.
    fn count(&self, collection: &str) -> Result<usize, DocjsonError>;

    /// Names of non-empty collections.
    fn collections(&self) -> Result<Vec<String>, DocjsonError>;

    /// Next value of the collection's integer id sequence, starting at 1.
    ///
    /// Putting a record with an explicit `DocId::Int` advances the sequence
    /// past it, so generated ids never collide with stored ones.
    fn next_sequence(&mut self, collection: &str) -> Result<i64, DocjsonError>;
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// In-memory document store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    /// collection -> storage key -> record
    collections: BTreeMap<String, BTreeMap<String, Record>>,
    sequences: BTreeMap<String, i64>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn put(&mut self, collection: &str, record: Record) -> Result<(), DocjsonError> {
        if let DocId::Int(n) = record.id {
            let seq = self.sequences.entry(collection.to_string()).or_insert(0);
            *seq = (*seq).max(n);
        }
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(record.id.storage_key(), record);
        Ok(())
    }

    fn get(&self, collection: &str, id: &DocId) -> Result<Option<Record>, DocjsonError> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|records| records.get(&id.storage_key()))
            .cloned())
    }

    fn remove(&mut self, collection: &str, id: &DocId) -> Result<bool, DocjsonError> {
        let Some(records) = self.collections.get_mut(collection) else {
            return Ok(false);
        };
        let removed = records.remove(&id.storage_key()).is_some();
        if records.is_empty() {
            self.collections.remove(collection);
        }
        Ok(removed)
    }

    fn records(&self, collection: &str) -> Result<Vec<Record>, DocjsonError> {
        Ok(self
            .collections
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    fn count(&self, collection: &str) -> Result<usize, DocjsonError> {
        Ok(self.collections.get(collection).map_or(0, BTreeMap::len))
    }

    fn collections(&self) -> Result<Vec<String>, DocjsonError> {
        Ok(self.collections.keys().cloned().collect())
    }

    fn next_sequence(&mut self, collection: &str) -> Result<i64, DocjsonError> {
        let next = self.sequences.entry(collection.to_string()).or_insert(0);
        *next = next.saturating_add(1);
        Ok(*next)
    }
}
