//! Property-based tests for the Nebula client
//!
//! These tests verify invariants that must hold for all inputs:
//! - Planning never panics and stays within its shape rules
//! - Response mapping is total and deterministic
//! - Batch results keep input length and order
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;
use serde_json::{json, Value};

/// Arbitrary JSON up to a small depth
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "\\PC{0,20}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::hash_map("[a-z_]{1,12}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

// ============================================================================
// AUTHORITY AND HASH TESTS
// ============================================================================

mod normalizer_tests {
    use super::*;
    use nebula::normalizer::{
        content_hash, plan_write, validate_authority, WritePlan, AUTHORITY_KEY,
    };
    use nebula::Memory;

    proptest! {
        /// Invariant: validated authority is always within [0, 1]
        #[test]
        fn authority_in_range(x in any::<f64>()) {
            if let Some(v) = validate_authority(x) {
                prop_assert!((0.0..=1.0).contains(&v));
                prop_assert_eq!(v, x);
            }
        }

        /// Invariant: the hash is a 64-char lowercase hex digest, stable across calls
        #[test]
        fn content_hash_stable(s in "\\PC{0,200}") {
            let first = content_hash(&s);
            prop_assert_eq!(first.len(), 64);
            prop_assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
            prop_assert_eq!(first, content_hash(&s));
        }

        /// Invariant: planning arbitrary JSON content never panics
        #[test]
        fn planning_never_panics(content in arb_json(), role in proptest::option::of("[a-z]{0,8}"), id in proptest::option::of("[a-z0-9-]{0,8}")) {
            let mut memory = Memory::new("c1", content);
            memory.role = role;
            memory.memory_id = id;
            let _ = plan_write(&memory);
        }

        /// Invariant: documents only ever carry an in-range authority
        #[test]
        fn document_authority_folded(text in "[a-z ]{1,40}", authority in -2.0f64..3.0) {
            let memory = Memory::new("c1", text).with_authority(authority);
            if let Ok(WritePlan::CreateDocument { payload }) = plan_write(&memory) {
                match payload["metadata"].get(AUTHORITY_KEY) {
                    Some(v) => prop_assert!((0.0..=1.0).contains(&v.as_f64().unwrap())),
                    None => prop_assert!(!(0.0..=1.0).contains(&authority)),
                }
            } else {
                prop_assert!(false, "expected a document plan");
            }
        }
    }
}

// ============================================================================
// CREDENTIAL DETECTION TESTS
// ============================================================================

mod auth_tests {
    use super::*;
    use nebula::auth::{is_api_key, AuthScheme};

    proptest! {
        /// Invariant: detection never panics
        #[test]
        fn never_panics(s in "\\PC*") {
            let _ = AuthScheme::detect(&s);
        }

        /// Invariant: well-formed keys are always API keys
        #[test]
        fn prefixed_keys_detected(prefix in "(key_|neb_)", public in "[a-z0-9]{0,12}", raw in "[A-Za-z0-9]{1,32}") {
            let key = format!("{}{}.{}", prefix, public, raw);
            prop_assert!(is_api_key(&key));
        }

        /// Invariant: anything with two or more dots is a bearer token
        #[test]
        fn jwt_shapes_are_bearer(a in "[A-Za-z0-9]{1,10}", b in "[A-Za-z0-9]{1,10}", c in "[A-Za-z0-9]{1,10}") {
            let token = format!("key_{}.{}.{}", a, b, c);
            prop_assert_eq!(AuthScheme::detect(&token), AuthScheme::Bearer);
        }
    }
}

// ============================================================================
// RESPONSE MAPPING TESTS
// ============================================================================

mod response_tests {
    use super::*;
    use nebula::{Collection, MemoryRecall, MemoryResponse, SearchResult};

    proptest! {
        /// Invariant: mapping arbitrary JSON never panics and is deterministic
        #[test]
        fn memory_mapping_total(value in arb_json()) {
            let first = MemoryResponse::from_value(&value);
            prop_assert_eq!(first, MemoryResponse::from_value(&value));
        }

        #[test]
        fn collection_mapping_total(value in arb_json()) {
            let first = Collection::from_value(&value);
            prop_assert_eq!(first, Collection::from_value(&value));
        }

        #[test]
        fn recall_mapping_total(value in arb_json(), query in "\\PC{0,20}") {
            let first = MemoryRecall::from_value(&value, &query);
            prop_assert_eq!(first, MemoryRecall::from_value(&value, &query));
        }

        /// Invariant: chunk-style search results always map
        #[test]
        fn chunk_result_total(value in arb_json()) {
            let _ = SearchResult::from_chunk_value(&value);
        }

        /// Invariant: graph results fail only through the Decode variant
        #[test]
        fn graph_result_errors_are_decode(value in arb_json()) {
            if let Err(e) = SearchResult::from_graph_value(&value) {
                prop_assert!(matches!(e, nebula::NebulaError::Decode(_)));
            }
        }
    }
}

// ============================================================================
// BATCH PLANNING TESTS
// ============================================================================

mod batch_tests {
    use super::*;
    use nebula::batch::plan_batch;
    use nebula::Memory;

    fn arb_memory() -> impl Strategy<Value = Memory> {
        (
            prop_oneof![Just("c1"), Just("c2")],
            "[a-z]{1,10}",
            proptest::option::of(prop_oneof![Just("user"), Just("assistant")]),
            proptest::option::of(prop_oneof![Just("m1"), Just("m2")]),
        )
            .prop_map(|(collection, text, role, id)| {
                let mut memory = Memory::new(collection, text);
                memory.role = role.map(String::from);
                memory.memory_id = id.map(String::from);
                memory
            })
    }

    proptest! {
        /// Invariant: every input position lands in exactly one group or request
        #[test]
        fn positions_partition_input(memories in prop::collection::vec(arb_memory(), 0..20)) {
            let plan = plan_batch(&memories).unwrap();
            let mut seen: Vec<usize> = plan
                .groups
                .iter()
                .flat_map(|g| g.positions.iter().copied())
                .chain(plan.others.iter().map(|(p, _)| *p))
                .collect();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..memories.len()).collect::<Vec<_>>());
        }

        /// Invariant: grouped messages keep input order within their group
        #[test]
        fn group_positions_ascending(memories in prop::collection::vec(arb_memory(), 0..20)) {
            let plan = plan_batch(&memories).unwrap();
            for group in &plan.groups {
                prop_assert!(group.positions.windows(2).all(|w| w[0] < w[1]));
                let messages = group.append["messages"].as_array().unwrap();
                prop_assert_eq!(messages.len(), group.positions.len());
                for (message, &position) in messages.iter().zip(&group.positions) {
                    prop_assert_eq!(&message["role"], &json!(memories[position].role));
                }
            }
        }

        /// Invariant: one append per group, plus one create per new conversation
        #[test]
        fn call_count_bounds(memories in prop::collection::vec(arb_memory(), 0..20)) {
            let plan = plan_batch(&memories).unwrap();
            let new_groups = plan.groups.iter().filter(|g| g.create.is_some()).count();
            prop_assert_eq!(
                plan.call_count(),
                plan.groups.len() + new_groups + plan.others.len()
            );
        }
    }
}
