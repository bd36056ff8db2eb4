//! # Graph Deserializer
//!
//! Parses JSON into a live `Document`:
//! - primitive fields are rebuilt through the codec
//! - the `FromJson` exclusion filter drops keys at every nesting level
//! - reference fields holding a bare identifier become lazy handles
//! - reference fields holding a nested object are materialized as full
//!   sub-entities (with a synthesized identifier when none was given), which
//!   a later `Document::save` cascades to
//!
//! The decoded entity has every declared field marked changed, since it
//! originates from external data.

use crate::codec;
use crate::document::Document;
use crate::exclusion::{Direction, should_include};
use crate::primitives::{ID_KEY, MAX_INPUT_LENGTH, STORAGE_ID_KEY};
use crate::schema::{FieldDescriptor, FieldKind, PrimitiveKind, ReferenceSpec, Registry, Schema};
use crate::store::{DocumentStore, Record};
use crate::types::{DocId, DocjsonError, Reference, Value};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Options of one `from_json` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Mark the top-level entity as fresh (never saved).
    pub created: bool,
    /// Input is Extended JSON.
    pub raw: bool,
}

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// Parse JSON text, enforcing `MAX_INPUT_LENGTH`.
pub fn parse_json(json: &str) -> Result<Json, DocjsonError> {
    if json.len() > MAX_INPUT_LENGTH {
        return Err(DocjsonError::malformed(
            "$",
            format!(
                "input of {} bytes exceeds the {} byte limit",
                json.len(),
                MAX_INPUT_LENGTH
            ),
        ));
    }
    serde_json::from_str(json).map_err(|e| DocjsonError::malformed("$", e.to_string()))
}

/// Decode a document of `schema` from JSON text.
///
/// `store` enables autosave of materialized sub-entities and integer id
/// assignment for them; without it both are deferred to `Document::save`.
pub fn from_json(
    json: &str,
    schema: &Arc<Schema>,
    registry: &Registry,
    options: &DecodeOptions,
    store: Option<&mut (dyn DocumentStore + '_)>,
) -> Result<Document, DocjsonError> {
    from_value(&parse_json(json)?, schema, registry, options, store)
}

/// Decode a document of `schema` from a parsed JSON value.
pub fn from_value(
    json: &Json,
    schema: &Arc<Schema>,
    registry: &Registry,
    options: &DecodeOptions,
    store: Option<&mut (dyn DocumentStore + '_)>,
) -> Result<Document, DocjsonError> {
    let mut decoder = Decoder {
        registry,
        raw: options.raw,
        storage: false,
        store,
    };
    decoder.decode_document(json, schema, options.created, "$")
}

/// Rebuild a clean document from its storage record.
pub(crate) fn from_record(
    schema: &Arc<Schema>,
    registry: &Registry,
    record: &Record,
) -> Result<Document, DocjsonError> {
    let json = parse_json(&record.body)?;
    let mut decoder = Decoder {
        registry,
        raw: true,
        storage: true,
        store: None,
    };
    let mut doc = decoder.decode_document(&json, schema, false, "$")?;
    if doc.id().is_none() {
        doc.set_id(record.id.clone());
    }
    Ok(doc)
}

// =============================================================================
// DECODER
// =============================================================================

/// Input key holding the identifier, if any.
///
/// Raw input uses `_id`. Human input accepts `id`, `_id`, or the identifier's
/// attribute name when no declared field reads that key. Failing that, the
/// key the serializer emits under storage names is taken even if a field's
/// attribute name matches it: with storage names that field writes its
/// `db_field` instead.
fn find_id_key<'j>(schema: &Schema, obj: &'j Map<String, Json>, raw: bool) -> Option<&'j str> {
    let id = schema.id.as_ref()?;
    let present = move |key: &str| {
        obj.get_key_value(key)
            .filter(|(_, value)| !value.is_null())
            .map(|(key, _)| key.as_str())
    };
    if raw {
        return present(STORAGE_ID_KEY);
    }

    let owned_by_field = |key: &str| schema.fields.iter().any(|f| f.db_field == key || f.name == key);
    [ID_KEY, STORAGE_ID_KEY, id.name.as_str()]
        .into_iter()
        .filter(|key| !owned_by_field(key))
        .find(|key| obj.contains_key(*key))
        .and_then(present)
        .or_else(|| {
            let public = schema.public_id_key(true)?;
            if schema.fields.iter().any(|f| f.db_field == public) {
                return None;
            }
            present(public)
        })
}

struct Decoder<'a, 's> {
    registry: &'a Registry,
    raw: bool,
    /// Reading a storage record: no exclusion, no dirty marking.
    storage: bool,
    store: Option<&'a mut (dyn DocumentStore + 's)>,
}

impl Decoder<'_, '_> {
    fn decode_document(
        &mut self,
        json: &Json,
        schema: &Arc<Schema>,
        created: bool,
        path: &str,
    ) -> Result<Document, DocjsonError> {
        let Json::Object(obj) = json else {
            return Err(DocjsonError::unsupported(
                format!("{} object", schema.name),
                codec::json_type_name(json),
            ));
        };

        let mut doc = if self.storage {
            Document::existing(Arc::clone(schema), None)
        } else {
            let mut doc = Document::new(Arc::clone(schema));
            doc.set_created(created);
            doc
        };

        let id_key = find_id_key(schema, obj, self.raw);
        if let (Some(key), Some(id_field)) = (id_key, schema.id.as_ref()) {
            let id_path = format!("{}.{}", path, key);
            let id = obj
                .get(key)
                .map(|value| codec::decode_id(value, id_field.kind, self.raw))
                .transpose()
                .map_err(|e| e.at(&id_path))?;
            if let Some(id) = id {
                doc.set_id(id);
            }
        }

        for (key, value) in obj {
            if Some(key.as_str()) == id_key {
                continue;
            }
            let Some(field) = schema.field_for_key(key) else {
                tracing::debug!(collection = %schema.name, key = %key, "ignoring undeclared key");
                continue;
            };
            if !self.storage && !should_include(field, Direction::FromJson) {
                tracing::debug!(collection = %schema.name, field = %field.name, "excluded from input");
                continue;
            }
            let field_path = format!("{}.{}", path, field.name);
            let decoded = self.decode_field(field, value, created, &field_path)?;
            doc.insert_raw(field.name.clone(), decoded);
        }

        if !self.storage {
            doc.mark_all_changed();
        }
        Ok(doc)
    }

    fn decode_scalar(&self, json: &Json, kind: PrimitiveKind, path: &str) -> Result<Value, DocjsonError> {
        let decoded = if self.raw {
            codec::decode_extended(json, kind)
        } else {
            codec::decode_primitive(json, kind)
        };
        decoded.map_err(|e| e.at(path))
    }

    fn decode_field(
        &mut self,
        field: &FieldDescriptor,
        json: &Json,
        created: bool,
        path: &str,
    ) -> Result<Value, DocjsonError> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        match &field.kind {
            FieldKind::Primitive(kind) => self.decode_scalar(json, *kind, path),
            FieldKind::List(kind) => {
                let items = expect_array(json, "list")?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.decode_scalar(item, *kind, &format!("{}[{}]", path, i))?);
                }
                Ok(Value::List(out))
            }
            FieldKind::Dict(kind) => {
                let obj = expect_object(json, "dict")?;
                let mut out = BTreeMap::new();
                for (key, item) in obj {
                    let item_path = format!("{}.{}", path, key);
                    out.insert(key.clone(), self.decode_scalar(item, *kind, &item_path)?);
                }
                Ok(Value::Dict(out))
            }
            FieldKind::Reference(spec) => self.decode_reference(spec, json, path),
            FieldKind::ReferenceList(spec) => {
                let items = expect_array(json, "reference list")?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.decode_reference(spec, item, &format!("{}[{}]", path, i))?);
                }
                Ok(Value::List(out))
            }
            FieldKind::ReferenceDict(spec) => {
                let obj = expect_object(json, "reference dict")?;
                let mut out = BTreeMap::new();
                for (key, item) in obj {
                    let item_path = format!("{}.{}", path, key);
                    out.insert(key.clone(), self.decode_reference(spec, item, &item_path)?);
                }
                Ok(Value::Dict(out))
            }
            FieldKind::Embedded(schema) => self.decode_embedded(schema, json, created, path),
            FieldKind::EmbeddedList(schema) => {
                let items = expect_array(json, "embedded list")?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    out.push(self.decode_embedded(schema, item, created, &item_path)?);
                }
                Ok(Value::List(out))
            }
            FieldKind::EmbeddedDict(schema) => {
                let obj = expect_object(json, "embedded dict")?;
                let mut out = BTreeMap::new();
                for (key, item) in obj {
                    let item_path = format!("{}.{}", path, key);
                    out.insert(key.clone(), self.decode_embedded(schema, item, created, &item_path)?);
                }
                Ok(Value::Dict(out))
            }
        }
    }

    fn decode_embedded(
        &mut self,
        schema: &Arc<Schema>,
        json: &Json,
        created: bool,
        path: &str,
    ) -> Result<Value, DocjsonError> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        Ok(Value::embedded(self.decode_document(json, schema, created, path)?))
    }

    fn decode_reference(
        &mut self,
        spec: &ReferenceSpec,
        json: &Json,
        path: &str,
    ) -> Result<Value, DocjsonError> {
        let target = self.registry.get(&spec.target)?;
        let id_kind = target.id_kind();

        let obj = match json {
            Json::Null => return Ok(Value::Null),
            Json::Object(obj) => obj,
            Json::String(_) | Json::Number(_) => {
                let id = codec::decode_id(json, id_kind, self.raw).map_err(|e| e.at(path))?;
                return Ok(Value::lazy(id));
            }
            other => {
                return Err(DocjsonError::unsupported(
                    "reference",
                    codec::json_type_name(other),
                ));
            }
        };

        if let Some(id) = self.handle_id(spec, &target, obj, json, path)? {
            return Ok(Value::lazy(id));
        }

        // A full inline document: materialize it.
        let has_id = find_id_key(&target, obj, self.raw).is_some();
        let mut sub = self.decode_document(json, &target, !has_id, path)?;
        if sub.id().is_none() {
            match id_kind.generate() {
                Some(id) => sub.set_id(id),
                None => {
                    if let Some(store) = self.store.as_deref_mut() {
                        sub.set_id(store.next_sequence(&target.name)?);
                    }
                }
            }
        }

        let autosave = spec.follow.as_ref().is_some_and(|f| f.autosave);
        if autosave && let Some(store) = self.store.as_deref_mut() {
            sub.save(store)?;
        }
        Ok(Value::Reference(Reference::Resolved(Box::new(sub))))
    }

    /// Identifier of an object that is a handle rather than an inline document.
    ///
    /// A human-readable dbref handle is `{"collection", "id"}`. Followable
    /// dbref fields emit it when truncated, so it is recognised there too,
    /// unless the target declares its own `collection` key and the object
    /// may be an inlined target.
    fn handle_id(
        &self,
        spec: &ReferenceSpec,
        target: &Schema,
        obj: &Map<String, Json>,
        json: &Json,
        path: &str,
    ) -> Result<Option<DocId>, DocjsonError> {
        let id_kind = target.id_kind();
        let dbref_handle = spec.dbref
            && obj.contains_key("collection")
            && (spec.follow.is_none() || target.field_for_key("collection").is_none());
        let id_key = if self.raw {
            if !obj.contains_key("$ref") {
                let wrapped = ["$oid", "$uuid", "$numberLong", "$numberInt"]
                    .iter()
                    .any(|key| obj.contains_key(*key));
                if !wrapped {
                    return Ok(None);
                }
                return codec::decode_id(json, id_kind, true)
                    .map(Some)
                    .map_err(|e| e.at(path));
            }
            "$id"
        } else if dbref_handle {
            ID_KEY
        } else {
            return Ok(None);
        };

        // Validates the whole handle; the id itself is read with the target's kind.
        self.decode_scalar(json, PrimitiveKind::DbRef, path)?;
        let id_path = format!("{}.{}", path, id_key);
        obj.get(id_key)
            .map(|id| codec::decode_id(id, id_kind, self.raw))
            .transpose()
            .map_err(|e| e.at(&id_path))
    }
}

fn expect_array<'j>(json: &'j Json, expected: &str) -> Result<&'j Vec<Json>, DocjsonError> {
    json.as_array()
        .ok_or_else(|| DocjsonError::unsupported(expected, codec::json_type_name(json)))
}

fn expect_object<'j>(json: &'j Json, expected: &str) -> Result<&'j Map<String, Json>, DocjsonError> {
    json.as_object()
        .ok_or_else(|| DocjsonError::unsupported(expected, codec::json_type_name(json)))
}
