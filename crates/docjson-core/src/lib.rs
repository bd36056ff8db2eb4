//! # docjson-core
//!
//! Human-readable JSON for document graphs.
//!
//! This crate converts schema-declared documents to and from a plain JSON
//! form: the identifier key first, native values flattened to JSON-friendly
//! shapes, and reference fields either collapsed to identifiers or expanded
//! into nested objects under a depth policy.
//!
//! ## Pipeline
//!
//! ```text
//!   Document ──► serializer ──► resolver ──► codec ──► JSON
//!      ▲                                                  │
//!      └──────── deserializer ◄──── codec ◄───────────────┘
//! ```
//!
//! ## Architectural Constraints
//!
//! - Pure, synchronous Rust: no async, no network dependencies
//! - Closed dispatch: every field declares its kind up front
//! - Per-call traversal state is an immutable value threaded through the
//!   recursion; schemas and documents are never flagged during a call
//! - Depth-bounded, not cycle-detected: cyclic graphs with unbounded
//!   policies end in `RecursionLimitExceeded`. Opt in to ancestor-based
//!   truncation with `EncodeOptions::detect_cycles`.

// =============================================================================
// MODULES
// =============================================================================

pub mod codec;
pub mod config;
pub mod deserializer;
pub mod document;
pub mod exclusion;
pub mod primitives;
pub mod queryset;
pub mod resolver;
pub mod schema;
pub mod serializer;
pub mod session;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Binary, Code, DbRef, DocId, DocjsonError, IdKind, ObjectId, Reference, Regex, Timestamp, Value,
};

// =============================================================================
// RE-EXPORTS: Schema & Documents
// =============================================================================

pub use document::Document;
pub use schema::{
    DepthPolicy, FieldDescriptor, FieldKind, FollowSpec, PrimitiveKind, ReferenceSpec, Registry,
    Schema,
};

// =============================================================================
// RE-EXPORTS: JSON Engine
// =============================================================================

pub use deserializer::{DecodeOptions, from_json};
pub use queryset::QuerySet;
pub use resolver::Lookup;
pub use serializer::{EncodeOptions, JsonFormat, to_json};

// =============================================================================
// RE-EXPORTS: Storage
// =============================================================================

pub use config::{BackendKind, DocjsonConfig};
pub use session::{Session, StorageBackend};
pub use store::{DocumentStore, MemoryStore, RedbStore, Record};
