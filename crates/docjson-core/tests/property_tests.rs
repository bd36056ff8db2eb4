//! # Property-Based Tests
//!
//! Round-trip, identifier-first and depth invariants checked with proptest.

use chrono::DateTime;
use docjson_core::{
    Binary, DecodeOptions, DepthPolicy, Document, EncodeOptions, FieldDescriptor, FieldKind,
    FollowSpec, IdKind, PrimitiveKind, ReferenceSpec, Registry, Schema, Value,
};
use proptest::collection::vec;
use proptest::prelude::*;
use serde_json::Value as Json;
use std::sync::Arc;

fn record_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register(
        Schema::collection("records", IdKind::Int)
            .field(FieldDescriptor::primitive("label", PrimitiveKind::String).with_db_field("l"))
            .field(FieldDescriptor::primitive("count", PrimitiveKind::Int))
            .field(FieldDescriptor::primitive("flag", PrimitiveKind::Bool))
            .field(FieldDescriptor::primitive("at", PrimitiveKind::DateTime))
            .field(FieldDescriptor::primitive("blob", PrimitiveKind::Binary))
            .field(FieldDescriptor::new("tags", FieldKind::List(PrimitiveKind::String))),
    );
    registry
}

/// Attached chain of `len` self-referencing links.
fn link_chain(len: usize, policy: &DepthPolicy) -> Document {
    let mut registry = Registry::new();
    let schema = registry.register(
        Schema::collection("links", IdKind::Int).field(FieldDescriptor::reference(
            "next",
            ReferenceSpec::follow("links", FollowSpec::default().with_max_depth(policy.clone())),
        )),
    );
    let mut tail: Option<Document> = None;
    for i in (0..len).rev() {
        let mut doc = Document::new(Arc::clone(&schema)).with_id(i as i64);
        if let Some(next) = tail.take() {
            doc.set("next", Value::reference(next)).expect("set next");
        }
        tail = Some(doc);
    }
    tail.expect("non-empty chain")
}

fn nested_depth(json: &Json) -> usize {
    let mut depth = 0;
    let mut current = json;
    while let Some(next @ Json::Object(_)) = current.get("next") {
        depth += 1;
        current = next;
    }
    depth
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Documents without followable references survive a human-readable round trip.
    #[test]
    fn human_round_trip(
        id in any::<i64>(),
        label in ".{0,24}",
        count in any::<i64>(),
        flag in any::<bool>(),
        millis in -2_208_988_800_000_i64..4_102_444_800_000,
        blob in vec(any::<u8>(), 0..64),
        tags in vec("[a-z]{0,8}", 0..6),
    ) {
        let registry = record_registry();
        let schema = registry.get("records").expect("schema");
        let at = DateTime::from_timestamp_millis(millis).expect("in range");
        let doc = Document::new(Arc::clone(&schema))
            .with_id(id)
            .with("label", label).expect("set")
            .with("count", count).expect("set")
            .with("flag", flag).expect("set")
            .with("at", at).expect("set")
            .with("blob", Binary::generic(blob)).expect("set")
            .with("tags", tags.into_iter().map(Value::from).collect::<Vec<_>>()).expect("set");

        for options in [EncodeOptions::default(), EncodeOptions::default().epoch()] {
            let json = docjson_core::to_json(&doc, &options, None).expect("encode");
            let decoded = docjson_core::from_json(&json, &schema, &registry, &DecodeOptions::default(), None)
                .expect("decode");
            prop_assert_eq!(&decoded, &doc);
        }
    }

    /// Extended JSON round-trips the same documents.
    #[test]
    fn raw_round_trip(id in any::<i64>(), count in any::<i64>(), blob in vec(any::<u8>(), 0..32)) {
        let registry = record_registry();
        let schema = registry.get("records").expect("schema");
        let doc = Document::new(Arc::clone(&schema))
            .with_id(id)
            .with("count", count).expect("set")
            .with("blob", Binary::new(5, blob)).expect("set");

        let json = docjson_core::to_json(&doc, &EncodeOptions::default().raw(), None).expect("encode");
        let options = DecodeOptions { raw: true, ..DecodeOptions::default() };
        let decoded = docjson_core::from_json(&json, &schema, &registry, &options, None).expect("decode");
        prop_assert_eq!(decoded, doc);
    }

    /// The identifier key is first in every emitted object.
    #[test]
    fn identifier_first(len in 1usize..8, limit in 0usize..8) {
        let doc = link_chain(len, &DepthPolicy::Limit(limit));
        let json = docjson_core::serializer::to_value(&doc, &EncodeOptions::default(), None).expect("encode");

        let mut current = Some(&json);
        while let Some(Json::Object(obj)) = current {
            prop_assert_eq!(obj.keys().next().map(String::as_str), Some("id"));
            current = obj.get("next");
        }
    }

    /// A fixed limit nests min(limit, len - 1) objects.
    #[test]
    fn depth_monotonicity(len in 1usize..12, limit in 0usize..12) {
        let doc = link_chain(len, &DepthPolicy::Limit(limit));
        let json = docjson_core::serializer::to_value(&doc, &EncodeOptions::default(), None).expect("encode");
        prop_assert_eq!(nested_depth(&json), limit.min(len - 1));
    }

    /// Unlimited inlines every hop of an acyclic chain.
    #[test]
    fn unlimited_acyclic(len in 1usize..20) {
        let doc = link_chain(len, &DepthPolicy::Unlimited);
        let json = docjson_core::serializer::to_value(&doc, &EncodeOptions::default(), None).expect("encode");
        prop_assert_eq!(nested_depth(&json), len - 1);
    }

    /// Serialization is deterministic.
    #[test]
    fn encode_is_deterministic(len in 1usize..6) {
        let doc = link_chain(len, &DepthPolicy::Limit(2));
        let first = docjson_core::to_json(&doc, &EncodeOptions::default(), None).expect("encode");
        let second = docjson_core::to_json(&doc, &EncodeOptions::default(), None).expect("encode");
        prop_assert_eq!(first, second);
    }
}
