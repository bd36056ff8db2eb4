//! # Field Exclusion Filter
//!
//! Decides whether a field participates in one JSON direction. Applied
//! independently at every nesting level.

use crate::schema::FieldDescriptor;

/// JSON direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToJson,
    FromJson,
}

/// Check whether `field` takes part in `direction`.
///
/// A field is excluded by its direction-specific flag or by `exclude_json`.
#[must_use]
pub fn should_include(field: &FieldDescriptor, direction: Direction) -> bool {
    if field.exclude_json {
        return false;
    }
    match direction {
        Direction::ToJson => !field.exclude_to_json,
        Direction::FromJson => !field.exclude_from_json,
    }
}
