//! # Wire Primitives
//!
//! Fixed constants of the docjson wire contract.
//!
//! These values are part of the observable JSON format and the storage
//! layout. Changing any of them is a breaking change for stored data.

/// Public key under which an entity identifier is emitted in human-readable JSON.
pub const ID_KEY: &str = "id";

/// Storage key of the identifier, also used in extended (raw) JSON.
pub const STORAGE_ID_KEY: &str = "_id";

/// Default follow depth for followable reference fields.
///
/// A self-referencing entity with this limit inlines three nested objects
/// before truncating to a bare identifier.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Hard ceiling on follow hops along a single traversal path.
///
/// Unlimited and negative depth policies rely on this ceiling to turn an
/// actual cycle into `RecursionLimitExceeded` instead of exhausting the stack.
pub const MAX_FOLLOW_DEPTH: usize = 128;

/// Maximum size of a JSON document accepted by `from_json` (64 MB).
pub const MAX_INPUT_LENGTH: usize = 64 * 1024 * 1024;

/// Binary subtype for generic byte payloads.
pub const BINARY_SUBTYPE_GENERIC: u8 = 0;

/// Binary subtype for RFC 4122 UUIDs in extended JSON.
pub const BINARY_SUBTYPE_UUID: u8 = 4;

/// Warning emitted once when a negative depth policy is defined.
pub const UNCHECKED_DEPTH_WARNING: &str =
    "[BE CAREFUL!] Unlimited self reference might cause infinity loop! [BE CAREFUL!]";

/// Record format version stored in front of every persisted document body.
pub const RECORD_VERSION: u8 = 1;
