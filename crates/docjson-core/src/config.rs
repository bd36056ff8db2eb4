//! # Configuration
//!
//! Serde-deserializable configuration: storage location, default encode
//! options, and declarative schemas. The format is file-agnostic; the binary
//! reads it from TOML.
//!
//! ```toml
//! [storage]
//! backend = "redb"
//! path = "library.redb"
//!
//! [encode]
//! follow_reference = true
//! max_depth = 2
//!
//! [[schema.collections]]
//! name = "books"
//! id_kind = "int"
//!
//! [[schema.collections.fields]]
//! name = "author"
//! shape = "reference"
//! target = "authors"
//! follow = { max_depth = "unlimited" }
//! ```

use crate::schema::{
    DepthPolicy, FieldDescriptor, FieldKind, FollowSpec, PrimitiveKind, ReferenceSpec, Registry,
    Schema,
};
use crate::serializer::{EncodeOptions, JsonFormat};
use crate::types::{DocjsonError, IdKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocjsonConfig {
    pub storage: StorageConfig,
    pub encode: EncodeConfig,
    pub schema: RegistryConfig,
}

// =============================================================================
// STORAGE
// =============================================================================

/// Which store backs a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Redb,
    Memory,
}

impl BackendKind {
    /// Parse a backend name.
    pub fn parse(name: &str) -> Result<Self, DocjsonError> {
        match name {
            "redb" => Ok(Self::Redb),
            "memory" => Ok(Self::Memory),
            other => Err(DocjsonError::malformed(
                "$.storage.backend",
                format!("unknown backend '{}' (expected redb or memory)", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: BackendKind,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Redb,
            path: PathBuf::from("docjson.redb"),
        }
    }
}

// =============================================================================
// ENCODE DEFAULTS
// =============================================================================

/// A depth limit as written in configuration: an integer or `"unlimited"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxDepthDef {
    Limit(i64),
    Named(String),
}

impl MaxDepthDef {
    /// The depth policy this value names.
    pub fn to_policy(&self) -> Result<DepthPolicy, DocjsonError> {
        match self {
            Self::Limit(n) => Ok(DepthPolicy::from_limit(*n)),
            Self::Named(name) if name == "unlimited" => Ok(DepthPolicy::Unlimited),
            Self::Named(name) => Err(DocjsonError::malformed(
                "$.max_depth",
                format!("expected an integer or \"unlimited\", got \"{}\"", name),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodeConfig {
    pub follow_reference: bool,
    pub max_depth: Option<MaxDepthDef>,
    pub use_db_field: bool,
    pub epoch_mode: bool,
    pub raw: bool,
    pub cycle_detection: bool,
    pub indent: Option<usize>,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            follow_reference: false,
            max_depth: None,
            use_db_field: true,
            epoch_mode: false,
            raw: false,
            cycle_detection: false,
            indent: None,
        }
    }
}

impl EncodeConfig {
    /// Encode options with these defaults.
    pub fn to_options(&self) -> Result<EncodeOptions, DocjsonError> {
        let max_depth = match &self.max_depth {
            Some(def) => def.to_policy()?,
            None => DepthPolicy::default(),
        };
        Ok(EncodeOptions {
            follow_reference: self.follow_reference,
            max_depth,
            use_db_field: self.use_db_field,
            epoch_mode: self.epoch_mode,
            raw: self.raw,
            cycle_detection: self.cycle_detection,
            format: JsonFormat {
                indent: self.indent,
            },
            ..EncodeOptions::default()
        })
    }
}

// =============================================================================
// SCHEMAS
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Embedded types, built in order; each may embed the ones before it.
    pub embedded: Vec<SchemaDef>,
    pub collections: Vec<SchemaDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDef {
    pub name: String,
    #[serde(default)]
    pub id_kind: IdKind,
    /// Attribute name of the identifier (default `id`).
    #[serde(default)]
    pub id_name: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

/// Structural shape of a declared field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldShape {
    #[default]
    Primitive,
    List,
    Dict,
    Reference,
    ReferenceList,
    ReferenceDict,
    Embedded,
    EmbeddedList,
    EmbeddedDict,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FollowDef {
    pub id_check: Option<bool>,
    pub autosave: bool,
    pub max_depth: Option<MaxDepthDef>,
}

impl FollowDef {
    fn to_spec(&self) -> Result<FollowSpec, DocjsonError> {
        let mut spec = FollowSpec::default().with_autosave(self.autosave);
        if let Some(id_check) = self.id_check {
            spec = spec.with_id_check(id_check);
        }
        if let Some(def) = &self.max_depth {
            spec = spec.with_max_depth(def.to_policy()?);
        }
        Ok(spec)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub db_field: Option<String>,
    #[serde(default)]
    pub shape: FieldShape,
    /// Primitive kind of primitive, list and dict fields (default `any`).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Target collection of reference shapes, embedded type of embedded shapes.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub dbref: bool,
    /// Makes the reference followable under these options.
    #[serde(default)]
    pub follow: Option<FollowDef>,
    #[serde(default)]
    pub exclude_to_json: bool,
    #[serde(default)]
    pub exclude_from_json: bool,
    #[serde(default)]
    pub exclude_json: bool,
}

impl FieldDef {
    fn target(&self, owner: &str) -> Result<&str, DocjsonError> {
        self.target.as_deref().ok_or_else(|| {
            DocjsonError::malformed(
                format!("$.{}.{}", owner, self.name),
                "reference and embedded fields need a target",
            )
        })
    }

    fn primitive(&self) -> Result<PrimitiveKind, DocjsonError> {
        self.kind
            .as_deref()
            .map_or(Ok(PrimitiveKind::Any), PrimitiveKind::parse)
    }

    fn build(
        &self,
        owner: &str,
        embedded: &BTreeMap<String, Arc<Schema>>,
        collections: &[&str],
    ) -> Result<FieldDescriptor, DocjsonError> {
        let reference = || -> Result<ReferenceSpec, DocjsonError> {
            let target = self.target(owner)?;
            if !collections.contains(&target) {
                return Err(DocjsonError::UnknownCollection(target.to_string()));
            }
            let mut spec = match &self.follow {
                Some(follow) => ReferenceSpec::follow(target, follow.to_spec()?),
                None => ReferenceSpec::to(target),
            };
            if self.dbref {
                spec = spec.as_dbref();
            }
            Ok(spec)
        };
        let embedded_schema = || -> Result<Arc<Schema>, DocjsonError> {
            let target = self.target(owner)?;
            embedded
                .get(target)
                .cloned()
                .ok_or_else(|| DocjsonError::UnknownCollection(target.to_string()))
        };

        let kind = match self.shape {
            FieldShape::Primitive => FieldKind::Primitive(self.primitive()?),
            FieldShape::List => FieldKind::List(self.primitive()?),
            FieldShape::Dict => FieldKind::Dict(self.primitive()?),
            FieldShape::Reference => FieldKind::Reference(reference()?),
            FieldShape::ReferenceList => FieldKind::ReferenceList(reference()?),
            FieldShape::ReferenceDict => FieldKind::ReferenceDict(reference()?),
            FieldShape::Embedded => FieldKind::Embedded(embedded_schema()?),
            FieldShape::EmbeddedList => FieldKind::EmbeddedList(embedded_schema()?),
            FieldShape::EmbeddedDict => FieldKind::EmbeddedDict(embedded_schema()?),
        };

        let mut field = FieldDescriptor::new(self.name.clone(), kind).with_exclusion(
            self.exclude_to_json,
            self.exclude_from_json,
            self.exclude_json,
        );
        if let Some(db_field) = &self.db_field {
            field = field.with_db_field(db_field.clone());
        }
        Ok(field)
    }
}

impl RegistryConfig {
    /// Build the registry these definitions describe.
    ///
    /// Reference targets must name a declared collection; embedded targets
    /// must name an embedded type declared earlier.
    pub fn build(&self) -> Result<Registry, DocjsonError> {
        let collection_names: Vec<&str> = self.collections.iter().map(|c| c.name.as_str()).collect();

        let mut embedded = BTreeMap::new();
        for def in &self.embedded {
            let mut schema = Schema::embedded(def.name.clone());
            for field in &def.fields {
                schema = schema.field(field.build(&def.name, &embedded, &collection_names)?);
            }
            embedded.insert(def.name.clone(), Arc::new(schema));
        }

        let mut registry = Registry::new();
        for def in &self.collections {
            let mut schema = Schema::collection(def.name.clone(), def.id_kind);
            if let Some(id_name) = &def.id_name {
                schema = schema.with_id_name(id_name.clone());
            }
            for field in &def.fields {
                schema = schema.field(field.build(&def.name, &embedded, &collection_names)?);
            }
            registry.register(schema);
        }
        tracing::debug!(
            collections = registry.len(),
            embedded = embedded.len(),
            "built schema registry"
        );
        Ok(registry)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn library() -> DocjsonConfig {
        serde_json::from_value(json!({
            "storage": { "backend": "memory" },
            "encode": { "follow_reference": true, "max_depth": "unlimited", "indent": 2 },
            "schema": {
                "embedded": [
                    { "name": "Address", "fields": [
                        { "name": "city", "type": "string" }
                    ]}
                ],
                "collections": [
                    { "name": "authors", "fields": [
                        { "name": "name", "type": "string" },
                        { "name": "home", "shape": "embedded", "target": "Address" },
                        { "name": "password", "type": "string", "exclude_json": true }
                    ]},
                    { "name": "books", "id_kind": "int", "fields": [
                        { "name": "title", "type": "string", "db_field": "t" },
                        { "name": "authors", "shape": "reference_list", "target": "authors",
                          "follow": { "max_depth": 1, "autosave": true } }
                    ]}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn builds_registry_from_definitions() {
        let config = library();
        assert_eq!(config.storage.backend, BackendKind::Memory);

        let registry = config.schema.build().unwrap();
        assert_eq!(registry.len(), 2);

        let books = registry.get("books").unwrap();
        assert_eq!(books.id_kind(), IdKind::Int);
        assert_eq!(books.get_field("title").unwrap().db_field, "t");
        let spec = books.get_field("authors").unwrap().kind.reference_spec().unwrap();
        let follow = spec.follow.as_ref().unwrap();
        assert!(follow.autosave);
        assert!(matches!(follow.max_depth, DepthPolicy::Limit(1)));

        let authors = registry.get("authors").unwrap();
        assert!(authors.get_field("password").unwrap().exclude_json);
        assert!(authors.get_field("home").unwrap().kind.embedded_schema().is_some());
    }

    #[test]
    fn encode_defaults_become_options() {
        let options = library().encode.to_options().unwrap();
        assert!(options.follow_reference);
        assert!(matches!(options.max_depth, DepthPolicy::Unlimited));
        assert_eq!(options.format.indent, Some(2));
        assert!(options.use_db_field);

        let bad = EncodeConfig {
            max_depth: Some(MaxDepthDef::Named("forever".into())),
            ..EncodeConfig::default()
        };
        assert!(matches!(bad.to_options(), Err(DocjsonError::MalformedInput { .. })));
    }

    #[test]
    fn unknown_targets_are_rejected() {
        let mut config = library();
        config.schema.collections[1].fields[1].target = Some("editors".into());
        assert!(matches!(
            config.schema.build(),
            Err(DocjsonError::UnknownCollection(name)) if name == "editors"
        ));

        let mut config = library();
        config.schema.collections[0].fields[0].kind = Some("color".into());
        assert!(matches!(
            config.schema.build(),
            Err(DocjsonError::UnsupportedPrimitiveType { .. })
        ));
    }
}
