//! # Reference Following Tiers (F0-F4)
//!
//! ## Tiers
//! - F0: Primitive edge cases
//! - F1: Depth policies on self-referencing chains
//! - F2: Fan-out and embedding
//! - F3: Exclusion and round trip
//! - F4: Materialization, cascade save and identifier handling

use chrono::{DateTime, Utc};
use docjson_core::{
    Binary, DecodeOptions, DepthPolicy, DocId, DocjsonError, Document, EncodeOptions,
    FieldDescriptor, FieldKind, FollowSpec, IdKind, PrimitiveKind, Reference, ReferenceSpec,
    Registry, Schema, Session, Value,
};
use serde_json::{Value as Json, json};
use std::sync::Arc;

// =============================================================================
// FIXTURES
// =============================================================================

/// Self-referencing collection `nodes` whose `next` field follows under `policy`.
fn chain_registry(policy: DepthPolicy) -> Registry {
    let mut registry = Registry::new();
    registry.register(
        Schema::collection("nodes", IdKind::String)
            .field(FieldDescriptor::primitive("name", PrimitiveKind::String))
            .field(FieldDescriptor::reference(
                "next",
                ReferenceSpec::follow("nodes", FollowSpec::default().with_max_depth(policy)),
            )),
    );
    registry
}

/// Attached chain `n0 -> n1 -> ... -> n{len-1}`.
fn chain(registry: &Registry, len: usize) -> Document {
    let schema = registry.get("nodes").expect("schema");
    let mut tail: Option<Document> = None;
    for i in (0..len).rev() {
        let mut doc = Document::new(Arc::clone(&schema)).with_id(format!("n{}", i).as_str());
        doc.set("name", format!("node {}", i)).expect("set name");
        if let Some(next) = tail.take() {
            doc.set("next", Value::reference(next)).expect("set next");
        }
        tail = Some(doc);
    }
    tail.expect("non-empty chain")
}

/// Number of nested `next` objects before a bare identifier (or the end).
fn nested_objects(json: &Json) -> (usize, Option<&Json>) {
    let mut depth = 0;
    let mut current = json;
    loop {
        match current.get("next") {
            Some(next @ Json::Object(_)) => {
                depth += 1;
                current = next;
            }
            other => return (depth, other),
        }
    }
}

fn encode(doc: &Document, options: &EncodeOptions) -> Json {
    docjson_core::serializer::to_value(doc, options, None).expect("encode")
}

// =============================================================================
// TIER F0: PRIMITIVE EDGE CASES
// =============================================================================

mod f0_primitives {
    use super::*;

    fn event_schema() -> Arc<Schema> {
        Arc::new(
            Schema::collection("events", IdKind::Int)
                .field(FieldDescriptor::primitive("at", PrimitiveKind::DateTime))
                .field(FieldDescriptor::primitive("payload", PrimitiveKind::Binary)),
        )
    }

    /// F0.1: Epoch mode emits milliseconds; decoding truncates to them.
    #[test]
    fn epoch_millis_round_trip() {
        let at = DateTime::<Utc>::from_timestamp_micros(1_589_704_200_123_456).expect("valid");
        let doc = Document::new(event_schema())
            .with_id(1_i64)
            .with("at", at)
            .expect("set");

        let json = encode(&doc, &EncodeOptions::default().epoch());
        assert_eq!(json["at"], json!(1_589_704_200_123_i64));

        let registry = Registry::new();
        let decoded = docjson_core::from_json(
            &json.to_string(),
            &event_schema(),
            &registry,
            &DecodeOptions::default(),
            None,
        )
        .expect("decode");
        let expected = DateTime::<Utc>::from_timestamp_millis(1_589_704_200_123).expect("valid");
        assert_eq!(decoded.get("at"), Some(&Value::DateTime(expected)));
    }

    /// F0.2: Binary payloads use base64 data plus subtype.
    #[test]
    fn binary_payload_shape() {
        let doc = Document::new(event_schema())
            .with_id(1_i64)
            .with("payload", Binary::generic(vec![0_u8, 1, 2]))
            .expect("set");

        let json = encode(&doc, &EncodeOptions::default());
        assert_eq!(json["payload"], json!({"data": "AAEC", "type": 0}));

        let decoded = docjson_core::from_json(
            &json.to_string(),
            &event_schema(),
            &Registry::new(),
            &DecodeOptions::default(),
            None,
        )
        .expect("decode");
        assert_eq!(decoded.get("payload"), doc.get("payload"));
    }

    /// F0.3: A JSON shape with no decode rule is rejected.
    #[test]
    fn unsupported_shape_rejected() {
        let result = docjson_core::from_json(
            r#"{"id": 1, "payload": [1, 2]}"#,
            &event_schema(),
            &Registry::new(),
            &DecodeOptions::default(),
            None,
        );
        assert!(matches!(
            result,
            Err(DocjsonError::UnsupportedPrimitiveType { .. })
        ));
    }
}

// =============================================================================
// TIER F1: DEPTH POLICIES
// =============================================================================

mod f1_depth_policies {
    use super::*;

    /// F1.1: max_depth=3 inlines three objects, then a bare identifier.
    #[test]
    fn fixed_limit_nests_exactly_n_levels() {
        let registry = chain_registry(DepthPolicy::Limit(3));
        let json = encode(&chain(&registry, 6), &EncodeOptions::default());

        let (depth, tail) = nested_objects(&json);
        assert_eq!(depth, 3);
        assert_eq!(tail, Some(&json!("n4")));
    }

    /// F1.2: Limit 0 never follows.
    #[test]
    fn zero_limit_is_flat() {
        let registry = chain_registry(DepthPolicy::Limit(0));
        let json = encode(&chain(&registry, 3), &EncodeOptions::default());
        assert_eq!(json, json!({"id": "n0", "name": "node 0", "next": "n1"}));
    }

    /// F1.3: Unlimited inlines an acyclic chain completely.
    #[test]
    fn unlimited_inlines_acyclic_chain() {
        let registry = chain_registry(DepthPolicy::Unlimited);
        let json = encode(&chain(&registry, 8), &EncodeOptions::default());

        let (depth, tail) = nested_objects(&json);
        assert_eq!(depth, 7);
        assert_eq!(tail, None);
    }

    /// F1.4: A predicate truncates where it returns true.
    #[test]
    fn predicate_truncates_on_true() {
        let registry = chain_registry(DepthPolicy::predicate(|candidate, depth| {
            depth >= 1 || candidate.get("name") == Some(&Value::from("node 9"))
        }));
        let json = encode(&chain(&registry, 5), &EncodeOptions::default());

        let (depth, tail) = nested_objects(&json);
        assert_eq!(depth, 1);
        assert_eq!(tail, Some(&json!("n2")));
    }

    /// F1.5: current_depth starts the budget part-way.
    #[test]
    fn current_depth_consumes_budget() {
        let registry = chain_registry(DepthPolicy::Limit(3));
        let options = EncodeOptions {
            current_depth: 2,
            ..EncodeOptions::default()
        };
        let (depth, _) = nested_objects(&encode(&chain(&registry, 6), &options));
        assert_eq!(depth, 1);
    }

    fn cyclic_session(policy: DepthPolicy) -> Session {
        let mut session = Session::new();
        session.register(
            Schema::collection("nodes", IdKind::String)
                .field(FieldDescriptor::primitive("name", PrimitiveKind::String))
                .field(FieldDescriptor::reference(
                    "next",
                    ReferenceSpec::follow("nodes", FollowSpec::default().with_max_depth(policy)),
                )),
        );
        for (id, next) in [("a", "b"), ("b", "a")] {
            let mut doc = session
                .new_document("nodes")
                .expect("schema")
                .with_id(id)
                .with("name", id)
                .expect("set")
                .with("next", Value::lazy(next))
                .expect("set");
            session.save(&mut doc).expect("save");
        }
        session
    }

    /// F1.6: A negative limit on an actual cycle is fatal.
    #[test]
    fn negative_depth_on_cycle_fails() {
        let session = cyclic_session(DepthPolicy::from_limit(-1));
        let root = session
            .load("nodes", &DocId::from("a"))
            .expect("load")
            .expect("present");

        let result = session.to_json(&root, &EncodeOptions::default());
        assert!(matches!(
            result,
            Err(DocjsonError::RecursionLimitExceeded { .. })
        ));
    }

    /// F1.7: Opt-in cycle detection truncates at the first repeat.
    #[test]
    fn cycle_detection_truncates_repeats() {
        let session = cyclic_session(DepthPolicy::Unlimited);
        let root = session
            .load("nodes", &DocId::from("a"))
            .expect("load")
            .expect("present");

        let json = session
            .to_json(&root, &EncodeOptions::default().detect_cycles())
            .expect("encode");
        let json: Json = serde_json::from_str(&json).expect("parse");
        assert_eq!(
            json,
            json!({"id": "a", "name": "a", "next": {"id": "b", "name": "b", "next": "a"}})
        );
    }

    /// F1.8: A lazy target that is not stored is surfaced.
    #[test]
    fn missing_target_is_reported() {
        let mut session = cyclic_session(DepthPolicy::Limit(2));
        session
            .delete("nodes", &DocId::from("b"))
            .expect("delete");
        let root = session
            .load("nodes", &DocId::from("a"))
            .expect("load")
            .expect("present");

        assert!(matches!(
            session.to_json(&root, &EncodeOptions::default()),
            Err(DocjsonError::ReferenceTargetNotFound { ref id, .. }) if id == "b"
        ));
    }

    /// F1.9: A followable target without an identifier needs one.
    #[test]
    fn unsaved_target_requires_id() {
        let registry = chain_registry(DepthPolicy::Limit(3));
        let schema = registry.get("nodes").expect("schema");
        let orphan = Document::new(Arc::clone(&schema)).with("name", "x").expect("set");
        let root = Document::new(schema)
            .with_id("root")
            .with("next", Value::reference(orphan))
            .expect("set");

        let result =
            docjson_core::serializer::to_value(&root, &EncodeOptions::default(), None);
        assert!(matches!(
            result,
            Err(DocjsonError::ReferenceIdRequired { ref field }) if field == "$.next"
        ));
    }
}

// =============================================================================
// TIER F2: FAN-OUT AND EMBEDDING
// =============================================================================

mod f2_fan_out {
    use super::*;

    fn team_registry() -> Registry {
        let mut registry = Registry::new();
        let badge = Arc::new(
            Schema::embedded("Badge").field(FieldDescriptor::reference(
                "issuer",
                ReferenceSpec::follow("people", FollowSpec::default().with_max_depth(DepthPolicy::Limit(1))),
            )),
        );
        registry.register(
            Schema::collection("people", IdKind::Int)
                .field(FieldDescriptor::primitive("name", PrimitiveKind::String))
                .field(FieldDescriptor::embedded("badge", badge)),
        );
        registry.register(
            Schema::collection("teams", IdKind::Int)
                .field(FieldDescriptor::new(
                    "members",
                    FieldKind::ReferenceList(ReferenceSpec::to("people")),
                ))
                .field(FieldDescriptor::new(
                    "roles",
                    FieldKind::ReferenceDict(ReferenceSpec::to("people")),
                )),
        );
        registry
    }

    fn person(registry: &Registry, id: i64) -> Document {
        Document::new(registry.get("people").expect("schema"))
            .with_id(id)
            .with("name", format!("p{}", id))
            .expect("set")
    }

    /// F2.1: Three list targets are each inlined independently.
    #[test]
    fn list_fan_out() {
        let registry = team_registry();
        let members: Vec<Value> = (1..=3).map(|i| Value::reference(person(&registry, i))).collect();
        let team = Document::new(registry.get("teams").expect("schema"))
            .with_id(10_i64)
            .with("members", members)
            .expect("set");

        let json = encode(&team, &EncodeOptions::default().follow(DepthPolicy::Limit(1)));
        assert_eq!(
            json["members"],
            json!([
                {"id": 1, "name": "p1"},
                {"id": 2, "name": "p2"},
                {"id": 3, "name": "p3"}
            ])
        );

        // Without follow_reference the plain list stays as identifiers.
        let flat = encode(&team, &EncodeOptions::default());
        assert_eq!(flat["members"], json!([1, 2, 3]));
    }

    /// F2.2: Dict values share the holder's depth.
    #[test]
    fn dict_fan_out() {
        let registry = team_registry();
        let mut roles = std::collections::BTreeMap::new();
        roles.insert("lead".to_string(), Value::reference(person(&registry, 1)));
        roles.insert("owner".to_string(), Value::lazy(2_i64));
        let team = Document::new(registry.get("teams").expect("schema"))
            .with_id(10_i64)
            .with("roles", Value::Dict(roles))
            .expect("set");

        let json = encode(&team, &EncodeOptions::default().follow(DepthPolicy::Limit(1)).flat());
        assert_eq!(json["roles"], json!({"lead": 1, "owner": 2}));

        let followed = docjson_core::serializer::to_value(
            &team,
            &EncodeOptions::default().follow(DepthPolicy::Limit(1)),
            None,
        );
        // The lazy owner has no store to come from.
        assert!(matches!(
            followed,
            Err(DocjsonError::ReferenceTargetNotFound { .. })
        ));
    }

    /// F2.3: Embedding does not spend depth; references inside it do.
    #[test]
    fn embedded_hop_is_free() {
        let registry = team_registry();
        let people = registry.get("people").expect("schema");
        let badge_schema = people
            .get_field("badge")
            .and_then(|f| f.kind.embedded_schema())
            .cloned()
            .expect("badge schema");

        let issuer = person(&registry, 2);
        let badge = Document::new(badge_schema)
            .with("issuer", Value::reference(issuer))
            .expect("set");
        let holder = person(&registry, 1)
            .with("badge", Value::embedded(badge))
            .expect("set");

        let json = encode(&holder, &EncodeOptions::default());
        assert_eq!(
            json,
            json!({"id": 1, "name": "p1", "badge": {"issuer": {"id": 2, "name": "p2"}}})
        );
    }
}

// =============================================================================
// TIER F3: EXCLUSION AND ROUND TRIP
// =============================================================================

mod f3_exclusion {
    use super::*;

    fn account_registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(
            Schema::collection("accounts", IdKind::ObjectId)
                .field(FieldDescriptor::primitive("login", PrimitiveKind::String))
                .field(FieldDescriptor::primitive("password", PrimitiveKind::String).exclude_json())
                .field(FieldDescriptor::primitive("token", PrimitiveKind::String).exclude_to_json())
                .field(FieldDescriptor::primitive("role", PrimitiveKind::String).exclude_from_json())
                .field(FieldDescriptor::new("tags", FieldKind::List(PrimitiveKind::String))),
        );
        registry
    }

    /// F3.1: exclude_json fields never appear in either direction.
    #[test]
    fn exclusion_symmetry() {
        let registry = account_registry();
        let schema = registry.get("accounts").expect("schema");
        let doc = Document::new(Arc::clone(&schema))
            .with_id(docjson_core::ObjectId::new())
            .with("login", "ann")
            .expect("set")
            .with("password", "secret")
            .expect("set")
            .with("token", "t")
            .expect("set")
            .with("role", "admin")
            .expect("set");

        let json = encode(&doc, &EncodeOptions::default());
        let keys: Vec<&str> = json
            .as_object()
            .expect("object")
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, vec!["id", "login", "role"]);

        let input = json!({"login": "bob", "password": "p", "token": "t2", "role": "root"});
        let decoded = docjson_core::from_json(
            &input.to_string(),
            &schema,
            &registry,
            &DecodeOptions::default(),
            None,
        )
        .expect("decode");
        assert_eq!(decoded.get("password"), None);
        assert_eq!(decoded.get("role"), None);
        assert_eq!(decoded.get("token"), Some(&Value::from("t2")));
    }

    /// F3.2: Documents without followable references round-trip in both wire forms.
    #[test]
    fn round_trip() {
        let registry = account_registry();
        let schema = registry.get("accounts").expect("schema");
        let doc = Document::new(Arc::clone(&schema))
            .with_id(docjson_core::ObjectId::new())
            .with("login", "ann")
            .expect("set")
            .with("tags", vec![Value::from("a"), Value::from("b")])
            .expect("set");

        for options in [EncodeOptions::default(), EncodeOptions::default().raw()] {
            let json = docjson_core::to_json(&doc, &options, None).expect("encode");
            let decode = DecodeOptions {
                raw: options.raw,
                ..DecodeOptions::default()
            };
            let decoded = docjson_core::from_json(&json, &schema, &registry, &decode, None)
                .expect("decode");
            assert_eq!(decoded, doc);
        }
    }
}

// =============================================================================
// TIER F4: MATERIALIZATION AND CASCADE SAVE
// =============================================================================

mod f4_materialization {
    use super::*;
    use tempfile::tempdir;

    fn register(session: &mut Session) {
        session.register(
            Schema::collection("authors", IdKind::ObjectId)
                .field(FieldDescriptor::primitive("name", PrimitiveKind::String)),
        );
        session.register(
            Schema::collection("books", IdKind::Int)
                .field(FieldDescriptor::primitive("title", PrimitiveKind::String))
                .field(FieldDescriptor::reference(
                    "author",
                    ReferenceSpec::follow("authors", FollowSpec::default()),
                ))
                .field(FieldDescriptor::new(
                    "reviewers",
                    FieldKind::ReferenceList(ReferenceSpec::to("authors")),
                )),
        );
    }

    const BOOK: &str = r#"{
        "title": "Graphs",
        "author": {"name": "Ann"},
        "reviewers": [{"name": "Bob"}, {"name": "Cy"}]
    }"#;

    /// F4.1: A nested object without id gets a synthesized one.
    #[test]
    fn missing_id_is_synthesized_and_retrievable() {
        let mut session = Session::new();
        register(&mut session);

        let mut book = session
            .from_json("books", BOOK, &DecodeOptions::default())
            .expect("decode");
        let author_id = book
            .get("author")
            .and_then(Value::as_reference)
            .and_then(Reference::id)
            .cloned()
            .expect("synthesized id");
        assert_eq!(session.count("authors").expect("count"), 0);

        session.save(&mut book).expect("save");
        let author = session
            .load("authors", &author_id)
            .expect("load")
            .expect("retrievable");
        assert_eq!(author.get("name"), Some(&Value::from("Ann")));
    }

    /// F4.2: Saving the holder persists every materialized target.
    #[test]
    fn cascade_save_persists_targets() {
        let mut session = Session::new();
        register(&mut session);

        let mut book = session
            .from_json("books", BOOK, &DecodeOptions::default())
            .expect("decode");
        assert!(book.is_dirty());
        let id = session.save(&mut book).expect("save");

        assert_eq!(session.count("authors").expect("count"), 3);
        assert_eq!(session.count("books").expect("count"), 1);

        let stored = session.load("books", &id).expect("load").expect("present");
        let json = session
            .to_json(&stored, &EncodeOptions::default())
            .expect("encode");
        let json: Json = serde_json::from_str(&json).expect("parse");
        assert_eq!(json["author"]["name"], json!("Ann"));
        assert!(json["reviewers"][0].is_string());
    }

    /// F4.3: The whole flow survives a redb reopen.
    #[test]
    fn redb_cascade_and_reload() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("library.redb");

        let id = {
            let mut session = Session::with_redb(&path).expect("open");
            register(&mut session);
            let mut book = session
                .from_json("books", BOOK, &DecodeOptions::default())
                .expect("decode");
            session.save(&mut book).expect("save")
        };

        let mut session = Session::with_redb(&path).expect("reopen");
        register(&mut session);
        assert_eq!(session.collections().expect("collections"), vec!["authors", "books"]);

        let book = session.load("books", &id).expect("load").expect("present");
        let json = session
            .to_json(&book, &EncodeOptions::default().follow(DepthPolicy::Limit(1)))
            .expect("encode");
        let json: Json = serde_json::from_str(&json).expect("parse");
        assert_eq!(json["id"], json!(1));
        assert_eq!(json["reviewers"][1]["name"], json!("Cy"));
    }

    /// F4.4: A truncated followable dbref decodes back to a handle, so saving
    /// the holder leaves the stored target intact.
    #[test]
    fn truncated_dbref_round_trip_keeps_target() {
        let mut session = Session::new();
        session.register(
            Schema::collection("authors", IdKind::ObjectId)
                .field(FieldDescriptor::primitive("name", PrimitiveKind::String)),
        );
        session.register(Schema::collection("books", IdKind::Int).field(
            FieldDescriptor::reference(
                "author",
                ReferenceSpec::follow(
                    "authors",
                    FollowSpec::default().with_max_depth(DepthPolicy::Limit(0)),
                )
                .as_dbref(),
            ),
        ));

        let mut ann = session
            .new_document("authors")
            .expect("schema")
            .with("name", "Ann")
            .expect("set");
        let ann_id = session.save(&mut ann).expect("save author");
        let mut book = session
            .new_document("books")
            .expect("schema")
            .with("author", Value::lazy(ann_id.clone()))
            .expect("set");
        let book_id = session.save(&mut book).expect("save book");

        let stored = session.load("books", &book_id).expect("load").expect("present");
        let text = session
            .to_json(&stored, &EncodeOptions::default())
            .expect("encode");
        let json: Json = serde_json::from_str(&text).expect("parse");
        assert_eq!(json["author"]["collection"], json!("authors"));
        assert_eq!(json["author"]["id"], json!(ann_id.to_string()));

        let mut decoded = session
            .from_json("books", &text, &DecodeOptions::default())
            .expect("decode");
        let author = decoded
            .get("author")
            .and_then(Value::as_reference)
            .expect("reference");
        assert!(!author.is_resolved());
        assert_eq!(author.id(), Some(&ann_id));

        session.save(&mut decoded).expect("save decoded");
        let ann = session
            .load("authors", &ann_id)
            .expect("load")
            .expect("present");
        assert_eq!(ann.get("name"), Some(&Value::from("Ann")));
    }

    /// F4.5: Generated integer ids skip past explicitly imported ones.
    #[test]
    fn generated_int_id_skips_explicit_ids() {
        let mut session = Session::new();
        register(&mut session);

        let mut explicit = session
            .from_json("books", r#"{"id":1,"title":"Explicit"}"#, &DecodeOptions::default())
            .expect("decode");
        session.save(&mut explicit).expect("save");

        let mut generated = session
            .from_json("books", r#"{"title":"Generated"}"#, &DecodeOptions::default())
            .expect("decode");
        assert_eq!(session.save(&mut generated).expect("save"), DocId::Int(2));

        assert_eq!(session.count("books").expect("count"), 2);
        let first = session
            .load("books", &DocId::Int(1))
            .expect("load")
            .expect("present");
        assert_eq!(first.get("title"), Some(&Value::from("Explicit")));
    }
}
