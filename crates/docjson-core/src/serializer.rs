//! # Graph Serializer
//!
//! Walks a document's declared fields in declaration order and produces one
//! JSON object with the identifier key first.
//!
//! - Primitive fields go through the codec.
//! - Reference fields (scalar, list, dict) go through the resolver; followed
//!   targets are serialized recursively one hop deeper.
//! - Embedded documents are always inlined at the same depth.
//! - The `ToJson` exclusion filter applies at every nesting level.
//!
//! Serialization takes the document by shared reference and threads all
//! per-call state through an immutable `TraversalContext`.

use crate::codec;
use crate::document::Document;
use crate::exclusion::{Direction, should_include};
use crate::primitives::STORAGE_ID_KEY;
use crate::resolver::{FollowRule, Lookup, Resolution, Resolver, TraversalContext};
use crate::schema::{DepthPolicy, FieldDescriptor, FieldKind, ReferenceSpec};
use crate::types::{DbRef, DocId, DocjsonError, Value};
use serde::Serialize;
use serde_json::{Map, Value as Json};

// =============================================================================
// OPTIONS
// =============================================================================

/// Output layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonFormat {
    /// `None` for compact output, otherwise pretty-printed with this indent width.
    pub indent: Option<usize>,
}

/// Options of one `to_json` call.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Also follow plain reference fields, under `max_depth`.
    pub follow_reference: bool,
    pub max_depth: DepthPolicy,
    /// Depth at which the root document sits.
    pub current_depth: usize,
    /// Emit storage field names instead of attribute names.
    pub use_db_field: bool,
    /// Date/times as epoch milliseconds.
    pub epoch_mode: bool,
    /// Extended JSON output; never follows.
    pub raw: bool,
    /// Disable all following.
    pub flat: bool,
    /// Truncate targets already on the current path.
    pub cycle_detection: bool,
    pub format: JsonFormat,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            follow_reference: false,
            max_depth: DepthPolicy::default(),
            current_depth: 0,
            use_db_field: true,
            epoch_mode: false,
            raw: false,
            flat: false,
            cycle_detection: false,
            format: JsonFormat::default(),
        }
    }
}

impl EncodeOptions {
    /// Follow every reference field under `max_depth`.
    #[must_use]
    pub fn follow(mut self, max_depth: DepthPolicy) -> Self {
        self.follow_reference = true;
        self.max_depth = max_depth;
        self
    }

    /// Emit date/times as epoch milliseconds.
    #[must_use]
    pub fn epoch(mut self) -> Self {
        self.epoch_mode = true;
        self
    }

    /// Emit Extended JSON.
    #[must_use]
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    /// Disable following.
    #[must_use]
    pub fn flat(mut self) -> Self {
        self.flat = true;
        self
    }

    /// Emit attribute names instead of storage names.
    #[must_use]
    pub fn attribute_names(mut self) -> Self {
        self.use_db_field = false;
        self
    }

    /// Enable ancestor-identifier cycle detection.
    #[must_use]
    pub fn detect_cycles(mut self) -> Self {
        self.cycle_detection = true;
        self
    }

    /// Pretty-print with the given indent width.
    #[must_use]
    pub fn pretty(mut self, indent: usize) -> Self {
        self.format.indent = Some(indent);
        self
    }
}

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// Serialize a document to a JSON value.
///
/// `lookup` resolves lazy references that must be followed; without it such
/// references fail with `ReferenceTargetNotFound`.
pub fn to_value(
    doc: &Document,
    options: &EncodeOptions,
    lookup: Option<Lookup<'_>>,
) -> Result<Json, DocjsonError> {
    let encoder = Encoder {
        options,
        resolver: Resolver::new(lookup, options.cycle_detection),
        storage: false,
    };
    let ctx = TraversalContext::root(options.current_depth, doc.id().cloned());
    Ok(Json::Object(encoder.encode_document(doc, &ctx, "$")?))
}

/// Serialize a document to a JSON string.
pub fn to_json(
    doc: &Document,
    options: &EncodeOptions,
    lookup: Option<Lookup<'_>>,
) -> Result<String, DocjsonError> {
    write_json(&to_value(doc, options, lookup)?, options.format)
}

/// Storage body of a document: Extended JSON, storage names, no exclusion.
pub(crate) fn storage_body(doc: &Document) -> Result<String, DocjsonError> {
    let options = EncodeOptions::default().raw();
    let encoder = Encoder {
        options: &options,
        resolver: Resolver::default(),
        storage: true,
    };
    let ctx = TraversalContext::root(0, doc.id().cloned());
    let body = encoder.encode_document(doc, &ctx, "$")?;
    write_json(&Json::Object(body), JsonFormat::default())
}

/// Render a JSON value with the given layout.
pub fn write_json(value: &Json, format: JsonFormat) -> Result<String, DocjsonError> {
    let ser_err = |e: serde_json::Error| DocjsonError::SerializationError(e.to_string());
    match format.indent {
        None => serde_json::to_string(value).map_err(ser_err),
        Some(width) => {
            let indent = vec![b' '; width];
            let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent);
            let mut out = Vec::new();
            let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
            value.serialize(&mut serializer).map_err(ser_err)?;
            String::from_utf8(out).map_err(|e| DocjsonError::SerializationError(e.to_string()))
        }
    }
}

// =============================================================================
// ENCODER
// =============================================================================

fn kind_label(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::Primitive(pk) => pk.as_str(),
        FieldKind::List(_) => "list",
        FieldKind::Dict(_) => "dict",
        FieldKind::Reference(_) => "reference",
        FieldKind::ReferenceList(_) => "reference list",
        FieldKind::ReferenceDict(_) => "reference dict",
        FieldKind::Embedded(_) => "embedded",
        FieldKind::EmbeddedList(_) => "embedded list",
        FieldKind::EmbeddedDict(_) => "embedded dict",
    }
}

struct Encoder<'a> {
    options: &'a EncodeOptions,
    resolver: Resolver<'a>,
    /// Writing a storage record: no exclusion filter.
    storage: bool,
}

impl Encoder<'_> {
    fn raw(&self) -> bool {
        self.storage || self.options.raw
    }

    fn encode_document(
        &self,
        doc: &Document,
        ctx: &TraversalContext<'_>,
        path: &str,
    ) -> Result<Map<String, Json>, DocjsonError> {
        let schema = doc.schema();
        let raw = self.raw();
        let mut out = Map::new();

        if let Some(id) = doc.id() {
            let key = if raw {
                Some(STORAGE_ID_KEY)
            } else {
                schema.public_id_key(self.options.use_db_field)
            };
            if let Some(key) = key {
                out.insert(key.to_string(), codec::encode_id(id, raw)?);
            }
        }

        for field in &schema.fields {
            if !self.storage && !should_include(field, Direction::ToJson) {
                continue;
            }
            let Some(value) = doc.get(&field.name) else {
                continue;
            };
            let key = if raw {
                field.db_field.as_str()
            } else {
                field.key(self.options.use_db_field)
            };
            let field_path = format!("{}.{}", path, field.name);
            out.insert(key.to_string(), self.encode_field(field, value, ctx, &field_path)?);
        }
        Ok(out)
    }

    fn encode_field(
        &self,
        field: &FieldDescriptor,
        value: &Value,
        ctx: &TraversalContext<'_>,
        path: &str,
    ) -> Result<Json, DocjsonError> {
        if value.is_null() {
            return Ok(Json::Null);
        }
        let mismatch = || DocjsonError::unsupported(kind_label(&field.kind), value.type_name());
        match &field.kind {
            FieldKind::Primitive(_) | FieldKind::List(_) | FieldKind::Dict(_) => {
                self.encode_scalar(value).map_err(|e| e.at(path))
            }
            FieldKind::Reference(spec) => self.encode_reference(spec, value, ctx, path),
            FieldKind::ReferenceList(spec) => match value {
                Value::List(items) => Ok(Json::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| {
                            self.encode_reference(spec, item, ctx, &format!("{}[{}]", path, i))
                        })
                        .collect::<Result<_, _>>()?,
                )),
                _ => Err(mismatch()),
            },
            FieldKind::ReferenceDict(spec) => match value {
                Value::Dict(map) => {
                    let mut out = Map::new();
                    for (key, item) in map {
                        let item_path = format!("{}.{}", path, key);
                        out.insert(key.clone(), self.encode_reference(spec, item, ctx, &item_path)?);
                    }
                    Ok(Json::Object(out))
                }
                _ => Err(mismatch()),
            },
            FieldKind::Embedded(_) => self.encode_embedded(value, ctx, path),
            FieldKind::EmbeddedList(_) => match value {
                Value::List(items) => Ok(Json::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| self.encode_embedded(item, ctx, &format!("{}[{}]", path, i)))
                        .collect::<Result<_, _>>()?,
                )),
                _ => Err(mismatch()),
            },
            FieldKind::EmbeddedDict(_) => match value {
                Value::Dict(map) => {
                    let mut out = Map::new();
                    for (key, item) in map {
                        let item_path = format!("{}.{}", path, key);
                        out.insert(key.clone(), self.encode_embedded(item, ctx, &item_path)?);
                    }
                    Ok(Json::Object(out))
                }
                _ => Err(mismatch()),
            },
        }
    }

    fn encode_scalar(&self, value: &Value) -> Result<Json, DocjsonError> {
        if self.raw() {
            codec::encode_extended(value)
        } else {
            codec::encode_primitive(value, self.options.epoch_mode)
        }
    }

    /// Embedding is ownership: always inlined, no depth increment.
    fn encode_embedded(
        &self,
        value: &Value,
        ctx: &TraversalContext<'_>,
        path: &str,
    ) -> Result<Json, DocjsonError> {
        match value {
            Value::Null => Ok(Json::Null),
            Value::Embedded(doc) => Ok(Json::Object(self.encode_document(doc, ctx, path)?)),
            other => Err(DocjsonError::unsupported("embedded", other.type_name())),
        }
    }

    /// Follow rule for a reference field in this call, if it follows at all.
    fn rule<'s>(&'s self, spec: &'s ReferenceSpec) -> Option<FollowRule<'s>> {
        if self.raw() || self.options.flat {
            return None;
        }
        match &spec.follow {
            Some(follow) => Some(FollowRule {
                policy: &follow.max_depth,
                id_check: follow.id_check,
            }),
            None if self.options.follow_reference => Some(FollowRule {
                policy: &self.options.max_depth,
                id_check: true,
            }),
            None => None,
        }
    }

    fn encode_reference(
        &self,
        spec: &ReferenceSpec,
        value: &Value,
        ctx: &TraversalContext<'_>,
        path: &str,
    ) -> Result<Json, DocjsonError> {
        let reference = match value {
            Value::Null => return Ok(Json::Null),
            Value::Reference(reference) => reference,
            other => return Err(DocjsonError::unsupported("reference", other.type_name())),
        };

        let Some(rule) = self.rule(spec) else {
            return self.encode_handle(spec, reference.require_id(path)?);
        };

        match self.resolver.resolve(reference, &spec.target, rule, ctx, path)? {
            Resolution::Truncate(id) => self.encode_handle(spec, &id),
            Resolution::Follow(target) => {
                let child = ctx.child(target.id().cloned());
                Ok(Json::Object(self.encode_document(&target, &child, path)?))
            }
        }
    }

    /// Bare identifier, or a `DbRef` object for dbref fields.
    fn encode_handle(&self, spec: &ReferenceSpec, id: &DocId) -> Result<Json, DocjsonError> {
        if spec.dbref {
            self.encode_scalar(&Value::DbRef(DbRef::new(spec.target.clone(), id.clone())))
        } else {
            codec::encode_id(id, self.raw())
        }
    }
}
