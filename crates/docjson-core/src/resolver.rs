//! # Depth-Bounded Reference Resolver
//!
//! Decides, for each reference on a traversal path, whether to inline the
//! target ("follow") or truncate it to its bare identifier.
//!
//! ## Depth
//!
//! `TraversalContext::depth` counts follow hops from the serialization root.
//! Embedding hops never increment it; sibling list/dict elements share it.
//! With `DepthPolicy::Limit(n)` a reference is followed while `depth < n`.
//!
//! Cycle tolerance is this counter alone. `EncodeOptions::cycle_detection`
//! adds an opt-in check against the identifiers on the current path; every
//! path is additionally capped at `MAX_FOLLOW_DEPTH` hops, beyond which the
//! call fails with `RecursionLimitExceeded`.
//!
//! No resolution is cached across calls: repeated references to the same
//! target are fetched and serialized independently.

use crate::document::Document;
use crate::primitives::MAX_FOLLOW_DEPTH;
use crate::schema::{DepthPolicy, Registry};
use crate::store::DocumentStore;
use crate::types::{DocId, DocjsonError, Reference};
use std::borrow::Cow;

// =============================================================================
// LOOKUP
// =============================================================================

/// Read access to stored entities, used to resolve lazy references.
#[derive(Clone, Copy)]
pub struct Lookup<'a> {
    pub registry: &'a Registry,
    pub store: &'a dyn DocumentStore,
}

impl std::fmt::Debug for Lookup<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lookup")
            .field("registry", self.registry)
            .finish_non_exhaustive()
    }
}

impl<'a> Lookup<'a> {
    /// Create a lookup over a registry and a store.
    #[must_use]
    pub fn new(registry: &'a Registry, store: &'a dyn DocumentStore) -> Self {
        Self { registry, store }
    }

    /// Load an entity, failing with `ReferenceTargetNotFound` if absent.
    pub fn fetch(&self, collection: &str, id: &DocId) -> Result<Document, DocjsonError> {
        let schema = self.registry.get(collection)?;
        let record = self
            .store
            .get(collection, id)?
            .ok_or_else(|| not_found(collection, id))?;
        crate::deserializer::from_record(&schema, self.registry, &record)
    }
}

fn not_found(collection: &str, id: &DocId) -> DocjsonError {
    DocjsonError::ReferenceTargetNotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

// =============================================================================
// TRAVERSAL CONTEXT
// =============================================================================

/// Immutable per-path traversal state.
///
/// Each followed hop creates a child context pointing at its parent, so the
/// ancestor chain is exactly the current path and vanishes when the
/// recursive call returns.
#[derive(Debug)]
pub struct TraversalContext<'p> {
    depth: usize,
    id: Option<DocId>,
    parent: Option<&'p TraversalContext<'p>>,
}

impl TraversalContext<'static> {
    /// Root context at the given starting depth.
    #[must_use]
    pub fn root(depth: usize, id: Option<DocId>) -> Self {
        Self {
            depth,
            id,
            parent: None,
        }
    }
}

impl TraversalContext<'_> {
    /// Context for a followed target one hop deeper.
    #[must_use]
    pub fn child(&self, id: Option<DocId>) -> TraversalContext<'_> {
        TraversalContext {
            depth: self.depth.saturating_add(1),
            id,
            parent: Some(self),
        }
    }

    /// Follow hops taken so far.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Check whether `id` belongs to an entity on the current path.
    #[must_use]
    pub fn on_path(&self, id: &DocId) -> bool {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if ctx.id.as_ref() == Some(id) {
                return true;
            }
            current = ctx.parent;
        }
        false
    }
}

// =============================================================================
// FOLLOW DECISION
// =============================================================================

/// Decide whether `candidate` at `current_depth` is inlined.
///
/// Predicates use the depth-based convention: `f(candidate, depth) == true`
/// truncates the candidate to its identifier.
#[must_use]
pub fn should_follow(policy: &DepthPolicy, candidate: &Document, current_depth: usize) -> bool {
    match policy {
        DepthPolicy::Limit(limit) => current_depth < *limit,
        DepthPolicy::Unlimited | DepthPolicy::Unchecked => true,
        DepthPolicy::Predicate(predicate) => !predicate.stops(candidate, current_depth),
    }
}

/// Follow rule applying to one reference field in one call.
#[derive(Debug, Clone, Copy)]
pub struct FollowRule<'p> {
    pub policy: &'p DepthPolicy,
    pub id_check: bool,
}

/// Outcome of resolving one reference.
#[derive(Debug)]
pub enum Resolution<'r> {
    /// Inline this entity one hop deeper.
    Follow(Cow<'r, Document>),
    /// Emit the bare identifier.
    Truncate(DocId),
}

/// Resolves references against attached entities and, for lazy handles, the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver<'a> {
    lookup: Option<Lookup<'a>>,
    cycle_detection: bool,
}

impl<'a> Resolver<'a> {
    /// Create a resolver.
    #[must_use]
    pub fn new(lookup: Option<Lookup<'a>>, cycle_detection: bool) -> Self {
        Self {
            lookup,
            cycle_detection,
        }
    }

    /// Resolve `reference` held by `field` into a follow or truncate outcome.
    ///
    /// A fixed limit that is already exhausted truncates without loading the
    /// target. Otherwise the target is taken from the handle or fetched from
    /// the store.
    pub fn resolve<'r>(
        &self,
        reference: &'r Reference,
        target: &str,
        rule: FollowRule<'_>,
        ctx: &TraversalContext<'_>,
        field: &str,
    ) -> Result<Resolution<'r>, DocjsonError> {
        let depth = ctx.depth();

        if let DepthPolicy::Limit(limit) = rule.policy
            && depth >= *limit
        {
            tracing::debug!(field, depth, "depth limit reached, truncating");
            return truncate(reference.id(), field);
        }

        let candidate: Cow<'r, Document> = match reference {
            Reference::Resolved(doc) => Cow::Borrowed(doc.as_ref()),
            Reference::Lazy(id) => match &self.lookup {
                Some(lookup) => Cow::Owned(lookup.fetch(target, id)?),
                None => return Err(not_found(target, id)),
            },
        };

        let Some(id) = candidate.id().cloned() else {
            if rule.id_check {
                return Err(DocjsonError::ReferenceIdRequired {
                    field: field.to_string(),
                });
            }
            return self.follow(candidate, depth, field);
        };

        if self.cycle_detection && ctx.on_path(&id) {
            tracing::debug!(field, %id, "target already on path, truncating");
            return Ok(Resolution::Truncate(id));
        }

        if !should_follow(rule.policy, &candidate, depth) {
            tracing::debug!(field, depth, %id, "depth policy declined, truncating");
            return Ok(Resolution::Truncate(id));
        }

        self.follow(candidate, depth, field)
    }

    fn follow<'r>(
        &self,
        candidate: Cow<'r, Document>,
        depth: usize,
        field: &str,
    ) -> Result<Resolution<'r>, DocjsonError> {
        if depth >= MAX_FOLLOW_DEPTH {
            return Err(DocjsonError::RecursionLimitExceeded {
                field: field.to_string(),
                depth,
            });
        }
        Ok(Resolution::Follow(candidate))
    }
}

/// Truncation needs an identifier; an unsaved target cannot be referenced.
fn truncate<'r>(id: Option<&DocId>, field: &str) -> Result<Resolution<'r>, DocjsonError> {
    id.cloned()
        .map(Resolution::Truncate)
        .ok_or_else(|| DocjsonError::ReferenceIdRequired {
            field: field.to_string(),
        })
}
