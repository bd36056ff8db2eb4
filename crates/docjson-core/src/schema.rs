//! # Schema Descriptors
//!
//! Every entity type declares its fields up front. The codec, resolver,
//! serializer and deserializer dispatch on `FieldKind`; there is no runtime
//! type registration.
//!
//! Reference targets are named by collection and resolved through the
//! `Registry`, so self- and mutually-referencing schemas need no cyclic
//! ownership.

use crate::document::Document;
use crate::primitives::{DEFAULT_MAX_DEPTH, UNCHECKED_DEPTH_WARNING};
use crate::types::{DocjsonError, IdKind};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// PRIMITIVE KINDS
// =============================================================================

/// Scalar kind of a primitive field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    String,
    Int,
    Float,
    Bool,
    DateTime,
    Binary,
    ObjectId,
    Uuid,
    Regex,
    DbRef,
    Timestamp,
    Code,
    /// Untyped: values are decoded from their JSON shape.
    Any,
}

impl PrimitiveKind {
    /// Name used in error messages and configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::DateTime => "datetime",
            Self::Binary => "binary",
            Self::ObjectId => "object_id",
            Self::Uuid => "uuid",
            Self::Regex => "regex",
            Self::DbRef => "db_ref",
            Self::Timestamp => "timestamp",
            Self::Code => "code",
            Self::Any => "any",
        }
    }

    /// Parse a configuration name.
    pub fn parse(name: &str) -> Result<Self, DocjsonError> {
        Ok(match name {
            "string" => Self::String,
            "int" => Self::Int,
            "float" => Self::Float,
            "bool" => Self::Bool,
            "datetime" => Self::DateTime,
            "binary" => Self::Binary,
            "object_id" => Self::ObjectId,
            "uuid" => Self::Uuid,
            "regex" => Self::Regex,
            "db_ref" => Self::DbRef,
            "timestamp" => Self::Timestamp,
            "code" => Self::Code,
            "any" => Self::Any,
            other => return Err(DocjsonError::unsupported("primitive kind", other)),
        })
    }
}

// =============================================================================
// DEPTH POLICY
// =============================================================================

/// Caller-supplied stop rule for a followable reference.
///
/// Called as `f(candidate, current_depth)`. Returning `true` truncates the
/// candidate to its identifier.
#[derive(Clone)]
pub struct DepthPredicate(Arc<dyn Fn(&Document, usize) -> bool + Send + Sync>);

impl DepthPredicate {
    /// Wrap a stop rule.
    pub fn new(f: impl Fn(&Document, usize) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Evaluate the rule for a candidate at the given depth.
    #[must_use]
    pub fn stops(&self, candidate: &Document, depth: usize) -> bool {
        (self.0)(candidate, depth)
    }
}

impl fmt::Debug for DepthPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DepthPredicate(..)")
    }
}

/// How many follow hops are permitted along one traversal path.
#[derive(Debug, Clone)]
pub enum DepthPolicy {
    /// Follow while `current_depth < n`.
    Limit(usize),
    /// Always follow. Cyclic graphs hit `MAX_FOLLOW_DEPTH`.
    Unlimited,
    /// A negative limit. Behaves like `Unlimited`; a warning is emitted
    /// when the policy is defined.
    Unchecked,
    /// Caller-supplied stop rule.
    Predicate(DepthPredicate),
}

impl DepthPolicy {
    /// Build a policy from a signed limit.
    ///
    /// Negative values produce `Unchecked` and log `UNCHECKED_DEPTH_WARNING`.
    #[must_use]
    pub fn from_limit(limit: i64) -> Self {
        if limit < 0 {
            tracing::warn!(limit, "{}", UNCHECKED_DEPTH_WARNING);
            Self::Unchecked
        } else {
            Self::Limit(limit as usize)
        }
    }

    /// Build a predicate policy.
    pub fn predicate(f: impl Fn(&Document, usize) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(DepthPredicate::new(f))
    }
}

impl Default for DepthPolicy {
    fn default() -> Self {
        Self::Limit(DEFAULT_MAX_DEPTH)
    }
}

// =============================================================================
// REFERENCE SPEC
// =============================================================================

/// Options of a followable reference field.
#[derive(Debug, Clone)]
pub struct FollowSpec {
    /// Require the target to carry an identifier before following.
    pub id_check: bool,
    /// Persist materialized sub-entities at decode time.
    pub autosave: bool,
    pub max_depth: DepthPolicy,
}

impl Default for FollowSpec {
    fn default() -> Self {
        Self {
            id_check: true,
            autosave: false,
            max_depth: DepthPolicy::default(),
        }
    }
}

impl FollowSpec {
    /// Set the depth policy.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: DepthPolicy) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the id check.
    #[must_use]
    pub fn with_id_check(mut self, id_check: bool) -> Self {
        self.id_check = id_check;
        self
    }

    /// Set autosave.
    #[must_use]
    pub fn with_autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }
}

/// Target and behaviour of a reference field.
#[derive(Debug, Clone)]
pub struct ReferenceSpec {
    /// Collection name of the target schema.
    pub target: String,
    /// Store and decode the reference as a `DbRef` handle.
    pub dbref: bool,
    /// `Some` for followable references.
    pub follow: Option<FollowSpec>,
}

impl ReferenceSpec {
    /// A plain reference into `target`.
    #[must_use]
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            dbref: false,
            follow: None,
        }
    }

    /// A followable reference into `target`.
    #[must_use]
    pub fn follow(target: impl Into<String>, spec: FollowSpec) -> Self {
        Self {
            target: target.into(),
            dbref: false,
            follow: Some(spec),
        }
    }

    /// Mark the reference as a `DbRef` handle.
    #[must_use]
    pub fn as_dbref(mut self) -> Self {
        self.dbref = true;
        self
    }
}

// =============================================================================
// FIELDS
// =============================================================================

/// Declared kind of a field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Primitive(PrimitiveKind),
    List(PrimitiveKind),
    Dict(PrimitiveKind),
    Reference(ReferenceSpec),
    ReferenceList(ReferenceSpec),
    ReferenceDict(ReferenceSpec),
    Embedded(Arc<Schema>),
    EmbeddedList(Arc<Schema>),
    EmbeddedDict(Arc<Schema>),
}

impl FieldKind {
    /// The reference spec, for any reference-valued kind.
    #[must_use]
    pub fn reference_spec(&self) -> Option<&ReferenceSpec> {
        match self {
            Self::Reference(spec) | Self::ReferenceList(spec) | Self::ReferenceDict(spec) => {
                Some(spec)
            }
            _ => None,
        }
    }

    /// The embedded schema, for any embedded kind.
    #[must_use]
    pub fn embedded_schema(&self) -> Option<&Arc<Schema>> {
        match self {
            Self::Embedded(schema) | Self::EmbeddedList(schema) | Self::EmbeddedDict(schema) => {
                Some(schema)
            }
            _ => None,
        }
    }
}

/// One declared attribute of an entity.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Attribute name.
    pub name: String,
    /// Storage name. Defaults to `name`.
    pub db_field: String,
    pub kind: FieldKind,
    pub exclude_to_json: bool,
    pub exclude_from_json: bool,
    pub exclude_json: bool,
}

impl FieldDescriptor {
    /// Declare a field.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            db_field: name.clone(),
            name,
            kind,
            exclude_to_json: false,
            exclude_from_json: false,
            exclude_json: false,
        }
    }

    /// Declare a primitive field.
    #[must_use]
    pub fn primitive(name: impl Into<String>, kind: PrimitiveKind) -> Self {
        Self::new(name, FieldKind::Primitive(kind))
    }

    /// Declare a single reference field.
    #[must_use]
    pub fn reference(name: impl Into<String>, spec: ReferenceSpec) -> Self {
        Self::new(name, FieldKind::Reference(spec))
    }

    /// Declare an embedded document field.
    #[must_use]
    pub fn embedded(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self::new(name, FieldKind::Embedded(schema))
    }

    /// Set the storage name.
    #[must_use]
    pub fn with_db_field(mut self, db_field: impl Into<String>) -> Self {
        self.db_field = db_field.into();
        self
    }

    /// Set the exclusion flags.
    #[must_use]
    pub fn with_exclusion(mut self, to_json: bool, from_json: bool, both: bool) -> Self {
        self.exclude_to_json = to_json;
        self.exclude_from_json = from_json;
        self.exclude_json = both;
        self
    }

    /// Exclude from both directions.
    #[must_use]
    pub fn exclude_json(mut self) -> Self {
        self.exclude_json = true;
        self
    }

    /// Exclude from encode output.
    #[must_use]
    pub fn exclude_to_json(mut self) -> Self {
        self.exclude_to_json = true;
        self
    }

    /// Exclude from decode input.
    #[must_use]
    pub fn exclude_from_json(mut self) -> Self {
        self.exclude_from_json = true;
        self
    }

    /// Output key for this field.
    #[must_use]
    pub fn key(&self, use_db_field: bool) -> &str {
        if use_db_field {
            &self.db_field
        } else {
            &self.name
        }
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

/// Identifier attribute of a top-level entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdField {
    /// Attribute name (usually `id`).
    pub name: String,
    pub kind: IdKind,
}

/// Declared shape of an entity type.
#[derive(Debug, Clone)]
pub struct Schema {
    /// Collection name, or type name for embedded schemas.
    pub name: String,
    /// `None` for embedded schemas.
    pub id: Option<IdField>,
    /// Fields in declaration order.
    pub fields: Vec<FieldDescriptor>,
}

impl Schema {
    /// Start a top-level collection schema.
    #[must_use]
    pub fn collection(name: impl Into<String>, id_kind: IdKind) -> Self {
        Self {
            name: name.into(),
            id: Some(IdField {
                name: crate::primitives::ID_KEY.to_string(),
                kind: id_kind,
            }),
            fields: Vec::new(),
        }
    }

    /// Start an embedded schema (no identifier).
    #[must_use]
    pub fn embedded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            fields: Vec::new(),
        }
    }

    /// Rename the identifier attribute.
    #[must_use]
    pub fn with_id_name(mut self, name: impl Into<String>) -> Self {
        if let Some(id) = self.id.as_mut() {
            id.name = name.into();
        }
        self
    }

    /// Append a field.
    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Look up a field by attribute name.
    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field by input key: storage name first, then attribute name.
    #[must_use]
    pub fn field_for_key(&self, key: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.db_field == key)
            .or_else(|| self.get_field(key))
    }

    /// Check for an embedded schema.
    #[must_use]
    pub fn is_embedded(&self) -> bool {
        self.id.is_none()
    }

    /// Identifier kind; embedded schemas report `ObjectId` for synthesized ids.
    #[must_use]
    pub fn id_kind(&self) -> IdKind {
        self.id.as_ref().map(|id| id.kind).unwrap_or_default()
    }

    /// Key under which the identifier is emitted in human-readable JSON.
    ///
    /// `id`, unless a declared field already outputs that key, in which case
    /// the identifier's attribute name is used.
    #[must_use]
    pub fn public_id_key(&self, use_db_field: bool) -> Option<&str> {
        let id = self.id.as_ref()?;
        let taken = self
            .fields
            .iter()
            .any(|f| f.key(use_db_field) == crate::primitives::ID_KEY);
        if taken && id.name == crate::primitives::ID_KEY {
            Some(crate::primitives::STORAGE_ID_KEY)
        } else if taken {
            Some(&id.name)
        } else {
            Some(crate::primitives::ID_KEY)
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Collection name → schema.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    schemas: BTreeMap<String, Arc<Schema>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, replacing any schema of the same name.
    pub fn register(&mut self, schema: Schema) -> Arc<Schema> {
        let schema = Arc::new(schema);
        self.schemas.insert(schema.name.clone(), Arc::clone(&schema));
        schema
    }

    /// Look up a schema.
    pub fn get(&self, name: &str) -> Result<Arc<Schema>, DocjsonError> {
        self.schemas
            .get(name)
            .cloned()
            .ok_or_else(|| DocjsonError::UnknownCollection(name.to_string()))
    }

    /// Registered collection names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Number of registered schemas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Check for an empty registry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
