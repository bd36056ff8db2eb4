//! # Session Module
//!
//! A `Session` combines a schema `Registry` with a document store and exposes
//! the document-level interface: save, load, delete, and the JSON forms.
//!
//! ## Storage Backends
//!
//! - `InMemory`: `MemoryStore` (fast, volatile)
//! - `Persistent`: `RedbStore` for disk-backed ACID storage

use crate::deserializer::{self, DecodeOptions};
use crate::document::Document;
use crate::queryset::QuerySet;
use crate::resolver::Lookup;
use crate::schema::{Registry, Schema};
use crate::serializer::{self, EncodeOptions};
use crate::store::{DocumentStore, MemoryStore, RedbStore};
use crate::types::{DocId, DocjsonError};
use std::path::Path;
use std::sync::Arc;

/// Storage backend for a Session.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory store (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed store using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

// NOTE: StorageBackend does NOT implement Clone.
// RedbStore (database handle) cannot be safely cloned.

impl StorageBackend {
    /// The backend as a shared store.
    #[must_use]
    pub fn store(&self) -> &dyn DocumentStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store,
        }
    }

    /// The backend as a mutable store.
    pub fn store_mut(&mut self) -> &mut dyn DocumentStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store,
        }
    }
}

/// A registry of schemas bound to a document store.
#[derive(Debug, Default)]
pub struct Session {
    backend: StorageBackend,
    registry: Registry,
}

impl Session {
    /// Create an empty session with in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session over an existing registry and backend.
    #[must_use]
    pub fn with_backend(registry: Registry, backend: StorageBackend) -> Self {
        Self { backend, registry }
    }

    /// Create a session with persistent redb storage.
    ///
    /// Opens or creates a redb database at the given path.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, DocjsonError> {
        let store = RedbStore::open(path)?;
        Ok(Self {
            backend: StorageBackend::Persistent(store),
            registry: Registry::new(),
        })
    }

    /// Check if using persistent storage.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    /// Get a reference to the storage backend.
    #[must_use]
    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    /// Get a mutable reference to the storage backend.
    pub fn backend_mut(&mut self) -> &mut StorageBackend {
        &mut self.backend
    }

    /// The schema registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // =========================================================================
    // SCHEMAS
    // =========================================================================

    /// Register a schema, replacing any previous one of the same name.
    pub fn register(&mut self, schema: Schema) -> Arc<Schema> {
        self.registry.register(schema)
    }

    /// Look up a registered schema.
    pub fn schema(&self, name: &str) -> Result<Arc<Schema>, DocjsonError> {
        self.registry.get(name)
    }

    /// Create a fresh document of a registered collection.
    pub fn new_document(&self, collection: &str) -> Result<Document, DocjsonError> {
        Ok(Document::new(self.schema(collection)?))
    }

    fn lookup(&self) -> Lookup<'_> {
        Lookup::new(&self.registry, self.backend.store())
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Cascade-save a document.
    pub fn save(&mut self, doc: &mut Document) -> Result<DocId, DocjsonError> {
        doc.save(self.backend.store_mut())
    }

    /// Load a document by identifier.
    pub fn load(&self, collection: &str, id: &DocId) -> Result<Option<Document>, DocjsonError> {
        let schema = self.schema(collection)?;
        match self.backend.store().get(&schema.name, id)? {
            Some(record) => Ok(Some(deserializer::from_record(
                &schema,
                &self.registry,
                &record,
            )?)),
            None => Ok(None),
        }
    }

    /// Delete a document by identifier. Returns whether it existed.
    pub fn delete(&mut self, collection: &str, id: &DocId) -> Result<bool, DocjsonError> {
        let schema = self.schema(collection)?;
        let removed = self.backend.store_mut().remove(&schema.name, id)?;
        if removed {
            tracing::debug!(collection = %schema.name, id = %id, "deleted document");
        }
        Ok(removed)
    }

    /// Number of stored documents in a collection.
    pub fn count(&self, collection: &str) -> Result<usize, DocjsonError> {
        self.backend.store().count(collection)
    }

    /// Names of non-empty collections.
    pub fn collections(&self) -> Result<Vec<String>, DocjsonError> {
        self.backend.store().collections()
    }

    // =========================================================================
    // JSON
    // =========================================================================

    /// Serialize a document, resolving lazy references through the store.
    pub fn to_json(&self, doc: &Document, options: &EncodeOptions) -> Result<String, DocjsonError> {
        serializer::to_json(doc, options, Some(self.lookup()))
    }

    /// Decode a document of `collection`.
    ///
    /// Materialized references marked `autosave` are persisted immediately;
    /// the rest wait for a cascade save.
    pub fn from_json(
        &mut self,
        collection: &str,
        json: &str,
        options: &DecodeOptions,
    ) -> Result<Document, DocjsonError> {
        let schema = self.schema(collection)?;
        deserializer::from_json(
            json,
            &schema,
            &self.registry,
            options,
            Some(self.backend.store_mut()),
        )
    }

    /// All stored documents of a collection.
    pub fn objects(&self, collection: &str) -> Result<QuerySet, DocjsonError> {
        let schema = self.schema(collection)?;
        let documents = self
            .backend
            .store()
            .records(&schema.name)?
            .iter()
            .map(|record| deserializer::from_record(&schema, &self.registry, record))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QuerySet::new(schema, documents))
    }

    /// Decode a JSON array of documents of `collection`.
    pub fn objects_from_json(
        &mut self,
        collection: &str,
        json: &str,
    ) -> Result<Vec<Document>, DocjsonError> {
        let schema = self.schema(collection)?;
        QuerySet::from_json(
            json,
            &schema,
            &self.registry,
            Some(self.backend.store_mut()),
        )
    }
}
