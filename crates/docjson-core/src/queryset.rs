//! # Collection Bulk Forms
//!
//! `QuerySet::to_json` renders a JSON array of flat per-document mappings:
//! no reference is followed, the exclusion filter applies, and the identifier
//! key comes first. `QuerySet::from_json` is its inverse.

use crate::deserializer::{self, DecodeOptions};
use crate::document::Document;
use crate::schema::{Registry, Schema};
use crate::serializer::{self, EncodeOptions};
use crate::store::DocumentStore;
use crate::types::DocjsonError;
use serde_json::Value as Json;
use std::sync::Arc;

/// Documents of one collection.
#[derive(Debug, Clone)]
pub struct QuerySet {
    schema: Arc<Schema>,
    documents: Vec<Document>,
}

impl QuerySet {
    /// Wrap loaded documents of `schema`.
    #[must_use]
    pub fn new(schema: Arc<Schema>, documents: Vec<Document>) -> Self {
        Self { schema, documents }
    }

    /// The collection schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter()
    }

    #[must_use]
    pub fn into_documents(self) -> Vec<Document> {
        self.documents
    }

    /// Render every document flat. Following is always disabled here.
    pub fn to_json(&self, options: &EncodeOptions) -> Result<String, DocjsonError> {
        let options = options.clone().flat();
        let items = self
            .documents
            .iter()
            .map(|doc| serializer::to_value(doc, &options, None))
            .collect::<Result<Vec<_>, _>>()?;
        serializer::write_json(&Json::Array(items), options.format)
    }

    /// Decode a JSON array into documents of `schema`.
    pub fn from_json(
        json: &str,
        schema: &Arc<Schema>,
        registry: &Registry,
        mut store: Option<&mut (dyn DocumentStore + '_)>,
    ) -> Result<Vec<Document>, DocjsonError> {
        let parsed = deserializer::parse_json(json)?;
        let Some(items) = parsed.as_array() else {
            return Err(DocjsonError::unsupported(
                "array",
                crate::codec::json_type_name(&parsed),
            ));
        };
        let options = DecodeOptions::default();
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                deserializer::from_value(item, schema, registry, &options, store.as_deref_mut())
                    .map_err(|e| match e {
                        DocjsonError::MalformedInput { path, reason } => DocjsonError::MalformedInput {
                            path: path.replacen('$', &format!("$[{}]", i), 1),
                            reason,
                        },
                        other => other,
                    })
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a QuerySet {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, FollowSpec, PrimitiveKind, ReferenceSpec};
    use crate::types::{IdKind, Value};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(
            Schema::collection("people", IdKind::Int)
                .field(FieldDescriptor::primitive("name", PrimitiveKind::String))
                .field(FieldDescriptor::primitive("secret", PrimitiveKind::String).exclude_json())
                .field(FieldDescriptor::reference(
                    "friend",
                    ReferenceSpec::follow("people", FollowSpec::default()),
                )),
        );
        registry
    }

    fn person(registry: &Registry, id: i64, name: &str) -> Document {
        Document::new(registry.get("people").unwrap())
            .with_id(id)
            .with("name", name)
            .unwrap()
            .with("secret", "x")
            .unwrap()
    }

    #[test]
    fn bulk_form_is_flat_and_filtered() {
        let registry = registry();
        let ann = person(&registry, 1, "Ann");
        let bob = person(&registry, 2, "Bob")
            .with("friend", Value::reference(ann.clone()))
            .unwrap();
        let set = QuerySet::new(registry.get("people").unwrap(), vec![ann, bob]);

        let json = set.to_json(&EncodeOptions::default()).unwrap();
        assert_eq!(
            json,
            r#"[{"id":1,"name":"Ann"},{"id":2,"name":"Bob","friend":1}]"#
        );
    }

    #[test]
    fn from_json_requires_an_array() {
        let registry = registry();
        let schema = registry.get("people").unwrap();
        let docs = QuerySet::from_json(r#"[{"id": 1, "name": "Ann"}, {"name": "Bob"}]"#, &schema, &registry, None)
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].id(), None);

        assert!(matches!(
            QuerySet::from_json(r#"{"id": 1}"#, &schema, &registry, None),
            Err(DocjsonError::UnsupportedPrimitiveType { .. })
        ));

        let err = QuerySet::from_json(r#"[{"id": 1}, {"id": "x"}]"#, &schema, &registry, None).unwrap_err();
        assert!(matches!(err, DocjsonError::MalformedInput { ref path, .. } if path == "$[1].id"));
    }
}
