//! # Core Type Definitions
//!
//! This module contains the native value model shared by every docjson component:
//! - Identifiers (`ObjectId`, `DocId`, `IdKind`)
//! - Scalar payloads with a dedicated wire shape (`Binary`, `DbRef`, `Regex`,
//!   `Timestamp`, `Code`)
//! - The closed value variant (`Value`) and reference handles (`Reference`)
//! - Error types (`DocjsonError`)
//!
//! ## Dispatch
//!
//! Every native value is one `Value` variant. The codec, serializer and
//! deserializer switch on that tag; nothing is registered at runtime.

use crate::document::Document;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// OBJECT ID
// =============================================================================

/// Counter component of freshly generated object ids.
static OID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Per-process random component of freshly generated object ids.
fn process_unique() -> &'static [u8; 5] {
    static UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
    UNIQUE.get_or_init(|| {
        let entropy = Uuid::new_v4().into_bytes();
        [entropy[0], entropy[1], entropy[2], entropy[3], entropy[4]]
    })
}

/// A 12-byte document identifier.
///
/// Layout: 4-byte big-endian creation time in seconds, 5 process-unique
/// bytes, 3-byte big-endian counter. The text form is 24 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate a fresh object id stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timestamp(Utc::now().timestamp() as u32)
    }

    /// Generate a fresh object id stamped with the given unix time.
    #[must_use]
    pub fn with_timestamp(seconds: u32) -> Self {
        let count = OID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(process_unique());
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        Self(bytes)
    }

    /// Build an object id from its raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    #[must_use]
    pub const fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Parse the 24-digit hex text form.
    pub fn parse_str(s: &str) -> Result<Self, DocjsonError> {
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| DocjsonError::MalformedInput {
            path: "$".to_string(),
            reason: format!("'{}' is not a valid ObjectId: {}", s, e),
        })?;
        Ok(Self(bytes))
    }

    /// Hex text form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Creation time embedded in the id.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        let seconds = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        Utc.timestamp_opt(i64::from(seconds), 0)
            .single()
            .unwrap_or_default()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = DocjsonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

// =============================================================================
// DOCUMENT IDENTIFIERS
// =============================================================================

/// Which identifier type an entity type uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    #[default]
    ObjectId,
    String,
    Int,
    Uuid,
}

impl IdKind {
    /// Synthesize a fresh identifier.
    ///
    /// Returns `None` for `Int`: integer ids come from the store's
    /// per-collection sequence when the entity is saved.
    #[must_use]
    pub fn generate(self) -> Option<DocId> {
        match self {
            Self::ObjectId => Some(DocId::ObjectId(ObjectId::new())),
            Self::String => Some(DocId::String(ObjectId::new().to_hex())),
            Self::Uuid => Some(DocId::Uuid(Uuid::new_v4())),
            Self::Int => None,
        }
    }

    /// Name used in error messages and configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ObjectId => "object_id",
            Self::String => "string",
            Self::Int => "int",
            Self::Uuid => "uuid",
        }
    }
}

/// Identifier of a stored entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DocId {
    ObjectId(ObjectId),
    String(String),
    Int(i64),
    Uuid(Uuid),
}

impl DocId {
    /// The identifier kind of this value.
    #[must_use]
    pub fn kind(&self) -> IdKind {
        match self {
            Self::ObjectId(_) => IdKind::ObjectId,
            Self::String(_) => IdKind::String,
            Self::Int(_) => IdKind::Int,
            Self::Uuid(_) => IdKind::Uuid,
        }
    }

    /// Key used by stores. Prefixed by kind so that `"1"` and `1` never collide.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::ObjectId(oid) => format!("o:{}", oid),
            Self::String(s) => format!("s:{}", s),
            Self::Int(n) => format!("i:{:020}", n),
            Self::Uuid(u) => format!("u:{}", u),
        }
    }

    /// The identifier as a native value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::ObjectId(oid) => Value::ObjectId(*oid),
            Self::String(s) => Value::String(s.clone()),
            Self::Int(n) => Value::Int(*n),
            Self::Uuid(u) => Value::Uuid(*u),
        }
    }

    /// Identifier carried by an identifier-shaped value.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::ObjectId(oid) => Some(Self::ObjectId(*oid)),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Int(n) => Some(Self::Int(*n)),
            Value::Uuid(u) => Some(Self::Uuid(*u)),
            _ => None,
        }
    }

    /// Parse a textual identifier as the given kind.
    pub fn parse(kind: IdKind, s: &str) -> Result<Self, DocjsonError> {
        match kind {
            IdKind::ObjectId => Ok(Self::ObjectId(ObjectId::parse_str(s)?)),
            IdKind::String => Ok(Self::String(s.to_string())),
            IdKind::Int => s.parse::<i64>().map(Self::Int).map_err(|e| {
                DocjsonError::malformed("$", format!("'{}' is not an integer id: {}", s, e))
            }),
            IdKind::Uuid => Uuid::parse_str(s).map(Self::Uuid).map_err(|e| {
                DocjsonError::malformed("$", format!("'{}' is not a UUID: {}", s, e))
            }),
        }
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectId(oid) => write!(f, "{}", oid),
            Self::String(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{}", n),
            Self::Uuid(u) => write!(f, "{}", u),
        }
    }
}

impl From<ObjectId> for DocId {
    fn from(oid: ObjectId) -> Self {
        Self::ObjectId(oid)
    }
}

impl From<Uuid> for DocId {
    fn from(uuid: Uuid) -> Self {
        Self::Uuid(uuid)
    }
}

impl From<i64> for DocId {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

// =============================================================================
// SCALAR PAYLOADS
// =============================================================================

/// A binary payload with its subtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    pub subtype: u8,
    pub bytes: Vec<u8>,
}

impl Binary {
    /// Create a binary payload.
    #[must_use]
    pub fn new(subtype: u8, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            subtype,
            bytes: bytes.into(),
        }
    }

    /// Create a generic (subtype 0) payload.
    #[must_use]
    pub fn generic(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(crate::primitives::BINARY_SUBTYPE_GENERIC, bytes)
    }
}

/// A cross-collection reference handle that is never followed.
#[derive(Debug, Clone, PartialEq)]
pub struct DbRef {
    pub collection: String,
    pub id: DocId,
    pub database: Option<String>,
    /// Extra attributes carried next to the reference.
    pub extra: BTreeMap<String, Value>,
}

impl DbRef {
    /// Create a reference into `collection`.
    #[must_use]
    pub fn new(collection: impl Into<String>, id: DocId) -> Self {
        Self {
            collection: collection.into(),
            id,
            database: None,
            extra: BTreeMap::new(),
        }
    }

    /// Attach a database name.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

/// A regular expression kept as pattern text plus flag letters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regex {
    pub pattern: String,
    /// Flag letters, kept sorted (`i`, `l`, `m`, `s`, `u`, `x`).
    pub flags: String,
}

impl Regex {
    /// Create a regex value. Flags are normalized to sorted, unique letters.
    #[must_use]
    pub fn new(pattern: impl Into<String>, flags: &str) -> Self {
        let mut letters: Vec<char> = flags.chars().collect();
        letters.sort_unstable();
        letters.dedup();
        Self {
            pattern: pattern.into(),
            flags: letters.into_iter().collect(),
        }
    }
}

/// An internal replication timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub time: u32,
    pub inc: u32,
}

/// Executable code with an optional scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub code: String,
    pub scope: Option<BTreeMap<String, Value>>,
}

// =============================================================================
// VALUE
// =============================================================================

/// A native field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Binary(Binary),
    ObjectId(ObjectId),
    Uuid(Uuid),
    Regex(Regex),
    DbRef(DbRef),
    Timestamp(Timestamp),
    Code(Code),
    MinKey,
    MaxKey,
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    /// A reference to another stored entity.
    Reference(Reference),
    /// An owned sub-document without its own identity.
    Embedded(Box<Document>),
}

impl Value {
    /// Short type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::DateTime(_) => "datetime",
            Self::Binary(_) => "binary",
            Self::ObjectId(_) => "object_id",
            Self::Uuid(_) => "uuid",
            Self::Regex(_) => "regex",
            Self::DbRef(_) => "db_ref",
            Self::Timestamp(_) => "timestamp",
            Self::Code(_) => "code",
            Self::MinKey => "min_key",
            Self::MaxKey => "max_key",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Reference(_) => "reference",
            Self::Embedded(_) => "embedded",
        }
    }

    /// Check for `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Wrap a live entity as a resolved reference.
    #[must_use]
    pub fn reference(document: Document) -> Self {
        Self::Reference(Reference::Resolved(Box::new(document)))
    }

    /// Wrap an identifier as a lazy reference.
    #[must_use]
    pub fn lazy(id: impl Into<DocId>) -> Self {
        Self::Reference(Reference::Lazy(id.into()))
    }

    /// Wrap a document as an embedded value.
    #[must_use]
    pub fn embedded(document: Document) -> Self {
        Self::Embedded(Box::new(document))
    }

    /// Borrow as a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as a reference handle.
    #[must_use]
    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Self::Reference(r) => Some(r),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }
}

impl From<ObjectId> for Value {
    fn from(oid: ObjectId) -> Self {
        Self::ObjectId(oid)
    }
}

impl From<Uuid> for Value {
    fn from(uuid: Uuid) -> Self {
        Self::Uuid(uuid)
    }
}

impl From<Binary> for Value {
    fn from(binary: Binary) -> Self {
        Self::Binary(binary)
    }
}

impl From<Reference> for Value {
    fn from(reference: Reference) -> Self {
        Self::Reference(reference)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

// =============================================================================
// REFERENCE
// =============================================================================

/// A directed edge from a holder entity to a target entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    /// Identifier only; the target is not loaded.
    Lazy(DocId),
    /// The target entity is attached.
    Resolved(Box<Document>),
}

impl Reference {
    /// Identifier of the target, if known.
    #[must_use]
    pub fn id(&self) -> Option<&DocId> {
        match self {
            Self::Lazy(id) => Some(id),
            Self::Resolved(doc) => doc.id(),
        }
    }

    /// The attached target, if resolved.
    #[must_use]
    pub fn document(&self) -> Option<&Document> {
        match self {
            Self::Lazy(_) => None,
            Self::Resolved(doc) => Some(doc),
        }
    }

    /// Identifier, or `ReferenceIdRequired` naming `field`.
    pub fn require_id(&self, field: &str) -> Result<&DocId, DocjsonError> {
        self.id().ok_or_else(|| DocjsonError::ReferenceIdRequired {
            field: field.to_string(),
        })
    }

    /// Check whether the target entity is attached.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in docjson.
///
/// - No silent failures
/// - Every top-level encode/decode is all-or-nothing: the first error aborts it
/// - Nothing in this crate retries; retries belong to the storage layer
#[derive(Debug, Error)]
pub enum DocjsonError {
    /// A value or JSON shape has no encode or decode rule.
    #[error("Unsupported primitive type: cannot convert {found} as {expected}")]
    UnsupportedPrimitiveType { expected: String, found: String },

    /// A reference target has no identifier and id checking is enabled.
    #[error("The referenced document needs ID: {field}")]
    ReferenceIdRequired { field: String },

    /// A follow path walked past the hard depth ceiling.
    #[error("Recursion limit exceeded at {field} (depth {depth})")]
    RecursionLimitExceeded { field: String, depth: usize },

    /// A referenced entity could not be located.
    #[error("Referenced document not found: {collection}/{id}")]
    ReferenceTargetNotFound { collection: String, id: String },

    /// JSON parse failure or an invalid shape for a typed field.
    #[error("Malformed input at {path}: {reason}")]
    MalformedInput { path: String, reason: String },

    /// No schema is registered under the name.
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// A record could not be encoded or decoded by the store.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred in the store.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl DocjsonError {
    /// Build a `MalformedInput` error.
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Build an `UnsupportedPrimitiveType` error.
    pub fn unsupported(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::UnsupportedPrimitiveType {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Re-anchor a `MalformedInput` raised without context at `path`.
    #[must_use]
    pub fn at(self, path: &str) -> Self {
        match self {
            Self::MalformedInput { path: old, reason } if old == "$" => Self::MalformedInput {
                path: path.to_string(),
                reason,
            },
            other => other,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
