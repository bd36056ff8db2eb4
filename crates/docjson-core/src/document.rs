//! # Document
//!
//! A live entity: a schema, an optional identifier, field values keyed by
//! attribute name, and dirty-tracking state.
//!
//! ## Cascade Save
//!
//! `Document::save` walks every reference value (scalar, list, dict, and
//! references nested in embedded documents) and saves each attached dirty
//! sub-entity before writing the holder. Attached sub-entities are stored by
//! identifier only.

use crate::schema::Schema;
use crate::store::{DocumentStore, Record};
use crate::types::{DocId, DocjsonError, Reference, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A live entity.
#[derive(Debug, Clone)]
pub struct Document {
    schema: Arc<Schema>,
    id: Option<DocId>,
    fields: BTreeMap<String, Value>,
    created: bool,
    changed: BTreeSet<String>,
}

impl PartialEq for Document {
    /// Field-wise equality; dirty-tracking state is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.schema.name == other.schema.name && self.id == other.id && self.fields == other.fields
    }
}

impl Document {
    /// Create a fresh, unsaved entity.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            id: None,
            fields: BTreeMap::new(),
            created: true,
            changed: BTreeSet::new(),
        }
    }

    /// Create an entity believed to already exist in storage.
    #[must_use]
    pub(crate) fn existing(schema: Arc<Schema>, id: Option<DocId>) -> Self {
        Self {
            schema,
            id,
            fields: BTreeMap::new(),
            created: false,
            changed: BTreeSet::new(),
        }
    }

    /// The entity's schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Collection (or embedded type) name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.schema.name
    }

    /// The identifier, if assigned.
    #[must_use]
    pub fn id(&self) -> Option<&DocId> {
        self.id.as_ref()
    }

    /// Assign the identifier.
    pub fn set_id(&mut self, id: impl Into<DocId>) {
        self.id = Some(id.into());
    }

    /// Builder form of `set_id`.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<DocId>) -> Self {
        self.set_id(id);
        self
    }

    /// Value of a declared field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a declared field and mark it changed.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), DocjsonError> {
        if self.schema.get_field(name).is_none() {
            return Err(DocjsonError::malformed(
                format!("$.{}", name),
                format!("'{}' has no field '{}'", self.schema.name, name),
            ));
        }
        self.fields.insert(name.to_string(), value.into());
        self.changed.insert(name.to_string());
        Ok(())
    }

    /// Builder form of `set`.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Self, DocjsonError> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Set fields in attribute-name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Store a decoded value without touching dirty state.
    pub(crate) fn insert_raw(&mut self, name: String, value: Value) {
        self.fields.insert(name, value);
    }

    /// Mark the entity as fresh (not yet in storage).
    pub(crate) fn set_created(&mut self, created: bool) {
        self.created = created;
    }

    /// Check whether the entity has never been saved.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Check whether a save would write anything.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.created || !self.changed.is_empty()
    }

    /// Mark every declared field as changed.
    pub fn mark_all_changed(&mut self) {
        self.changed = self.schema.fields.iter().map(|f| f.name.clone()).collect();
    }

    /// Names of changed fields.
    pub fn changed_fields(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(String::as_str)
    }

    fn mark_clean(&mut self) {
        self.created = false;
        self.changed.clear();
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Storage record of this entity.
    ///
    /// Fails with `ReferenceIdRequired` if the entity or any referenced
    /// sub-entity has no identifier.
    pub fn to_record(&self) -> Result<Record, DocjsonError> {
        let id = self
            .id
            .clone()
            .ok_or_else(|| DocjsonError::ReferenceIdRequired {
                field: self.schema.name.clone(),
            })?;
        let body = crate::serializer::storage_body(self)?;
        Ok(Record { id, body })
    }

    /// Save the entity and, first, every attached dirty sub-entity.
    ///
    /// Integer identifiers are drawn from the store's sequence; other kinds
    /// are synthesized. Saving a clean, non-created entity writes nothing.
    pub fn save(&mut self, store: &mut dyn DocumentStore) -> Result<DocId, DocjsonError> {
        if self.schema.is_embedded() {
            return Err(DocjsonError::UnknownCollection(self.schema.name.clone()));
        }

        let mut reassigned = Vec::new();
        for (name, value) in &mut self.fields {
            if cascade(value, store)? {
                reassigned.push(name.clone());
            }
        }
        self.changed.extend(reassigned);

        let id = match self.id.clone() {
            Some(id) => id,
            None => {
                let id = match self.schema.id_kind().generate() {
                    Some(id) => id,
                    None => DocId::Int(store.next_sequence(&self.schema.name)?),
                };
                self.id = Some(id.clone());
                self.created = true;
                id
            }
        };

        if !self.is_dirty() {
            return Ok(id);
        }

        let record = self.to_record()?;
        store.put(&self.schema.name, record)?;
        tracing::debug!(collection = %self.schema.name, id = %id, "saved document");
        self.mark_clean();
        Ok(id)
    }
}

/// Save attached dirty sub-entities inside `value`.
///
/// Returns `true` if any of them received a new identifier, meaning the
/// holder's stored form changed.
fn cascade(value: &mut Value, store: &mut dyn DocumentStore) -> Result<bool, DocjsonError> {
    match value {
        // A clean target may still hold dirty descendants, so it is always visited.
        Value::Reference(Reference::Resolved(doc)) => {
            let had_id = doc.id.is_some();
            doc.save(store)?;
            Ok(!had_id)
        }
        Value::List(items) => {
            let mut assigned = false;
            for item in items {
                assigned |= cascade(item, store)?;
            }
            Ok(assigned)
        }
        Value::Dict(map) => {
            let mut assigned = false;
            for item in map.values_mut() {
                assigned |= cascade(item, store)?;
            }
            Ok(assigned)
        }
        Value::Embedded(doc) => {
            let mut assigned = false;
            for child in doc.fields.values_mut() {
                assigned |= cascade(child, store)?;
            }
            Ok(assigned)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, PrimitiveKind, ReferenceSpec};
    use crate::store::MemoryStore;
    use crate::types::IdKind;

    fn author_schema() -> Arc<Schema> {
        Arc::new(
            Schema::collection("authors", IdKind::ObjectId)
                .field(FieldDescriptor::primitive("name", PrimitiveKind::String)),
        )
    }

    fn book_schema() -> Arc<Schema> {
        Arc::new(
            Schema::collection("books", IdKind::Int)
                .field(FieldDescriptor::primitive("title", PrimitiveKind::String))
                .field(FieldDescriptor::reference("author", ReferenceSpec::to("authors"))),
        )
    }

    #[test]
    fn set_rejects_undeclared_fields() {
        let mut doc = Document::new(author_schema());
        assert!(doc.set("name", "Ann").is_ok());
        assert!(matches!(
            doc.set("age", 3_i64),
            Err(DocjsonError::MalformedInput { .. })
        ));
    }

    #[test]
    fn save_assigns_ids_and_cleans() {
        let mut store = MemoryStore::new();
        let mut doc = Document::new(author_schema()).with("name", "Ann").unwrap();
        assert!(doc.is_dirty());
        let id = doc.save(&mut store).unwrap();
        assert!(matches!(id, DocId::ObjectId(_)));
        assert!(!doc.is_dirty());
        assert_eq!(store.count("authors").unwrap(), 1);
    }

    #[test]
    fn int_ids_come_from_the_sequence() {
        let mut store = MemoryStore::new();
        let mut first = Document::new(book_schema()).with("title", "A").unwrap();
        let mut second = Document::new(book_schema()).with("title", "B").unwrap();
        assert_eq!(first.save(&mut store).unwrap(), DocId::Int(1));
        assert_eq!(second.save(&mut store).unwrap(), DocId::Int(2));
    }

    #[test]
    fn cascade_saves_attached_targets_first() {
        let mut store = MemoryStore::new();
        let author = Document::new(author_schema()).with("name", "Ann").unwrap();
        let mut book = Document::new(book_schema())
            .with("title", "Rust")
            .unwrap()
            .with("author", Value::reference(author))
            .unwrap();

        book.save(&mut store).unwrap();
        assert_eq!(store.count("authors").unwrap(), 1);
        assert_eq!(store.count("books").unwrap(), 1);

        let stored_author = book.get("author").and_then(Value::as_reference).unwrap();
        assert!(stored_author.id().is_some());
        assert!(!stored_author.document().unwrap().is_dirty());
    }

    #[test]
    fn clean_document_save_is_noop() {
        let mut store = MemoryStore::new();
        let mut doc = Document::new(author_schema()).with("name", "Ann").unwrap();
        let id = doc.save(&mut store).unwrap();
        store.remove("authors", &id).unwrap();

        doc.save(&mut store).unwrap();
        assert_eq!(store.count("authors").unwrap(), 0);
    }

    #[test]
    fn embedded_documents_cannot_be_saved_alone() {
        let mut store = MemoryStore::new();
        let mut doc = Document::new(Arc::new(Schema::embedded("Address")));
        assert!(matches!(
            doc.save(&mut store),
            Err(DocjsonError::UnknownCollection(_))
        ));
    }
}
