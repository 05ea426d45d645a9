//! Property-based tests using proptest
//!
//! These tests verify filter canonicalization and the cache lookup partition
//! using randomized inputs.

use proptest::prelude::*;
use rescache::store::{canonicalize, QueryKey, ResourceCache};
use rescache::Resource;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// Generate arbitrary filter-like JSON
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z0-9]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 32, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..5)
                .prop_map(|entries| Value::Object(entries.into_iter().collect())),
        ]
    })
}

fn arb_filter() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,4}", arb_json(), 0..5)
        .prop_map(|entries| Value::Object(entries.into_iter().collect()))
}

/// One cache write
#[derive(Debug, Clone)]
enum Write {
    Put(u8),
    Error(u8),
    Remove(u8),
}

fn arb_write() -> impl Strategy<Value = Write> {
    prop_oneof![
        (0u8..16).prop_map(Write::Put),
        (0u8..16).prop_map(Write::Error),
        (0u8..16).prop_map(Write::Remove),
    ]
}

fn contains_empty_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .values()
            .any(|v| matches!(v, Value::Object(m) if m.is_empty()) || contains_empty_object(v)),
        Value::Array(items) => items.iter().any(contains_empty_object),
        _ => false,
    }
}

/// Same entries, inserted in reverse order
fn reversed(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, v) in map.iter().rev() {
                out.insert(key.clone(), reversed(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(reversed).collect()),
        other => other.clone(),
    }
}

mod canonicalization {
    use super::*;

    #[test]
    fn test_known_equivalences() {
        assert_eq!(QueryKey::new(&json!({"filters": {}})), QueryKey::new(&json!({})));
        assert_eq!(
            QueryKey::new(&json!({"a": 1, "b": 2})),
            QueryKey::new(&json!({"b": 2, "a": 1}))
        );
        assert_ne!(
            QueryKey::new(&json!({"filters": {"ids": []}})),
            QueryKey::new(&json!({}))
        );
    }

    proptest! {
        #[test]
        fn test_canonicalize_is_idempotent(filter in arb_filter()) {
            let once = canonicalize(&filter);
            prop_assert_eq!(canonicalize(&once), once);
        }

        #[test]
        fn test_key_ignores_insertion_order(filter in arb_filter()) {
            prop_assert_eq!(QueryKey::new(&filter), QueryKey::new(&reversed(&filter)));
        }

        #[test]
        fn test_canonical_form_has_no_empty_nested_objects(filter in arb_filter()) {
            prop_assert!(!contains_empty_object(&canonicalize(&filter)));
        }

        #[test]
        fn test_empty_members_do_not_change_the_key(filter in arb_filter(), name in "[A-Z]{1,4}") {
            let mut padded = filter.clone();
            if let Some(map) = padded.as_object_mut() {
                map.insert(name, json!({}));
            }
            prop_assert_eq!(QueryKey::new(&filter), QueryKey::new(&padded));
        }
    }
}

mod lookup_partition {
    use super::*;

    proptest! {
        #[test]
        fn test_every_id_lands_in_exactly_one_bucket(
            writes in prop::collection::vec(arb_write(), 0..64),
            requested in prop::collection::vec(0u8..20, 0..24),
        ) {
            let mut cache = ResourceCache::new();
            for write in &writes {
                match write {
                    Write::Put(id) => cache.put(Resource::new("posts", &id.to_string())),
                    Write::Error(id) => cache.put_error(&id.to_string()),
                    Write::Remove(id) => {
                        cache.remove(&id.to_string());
                    }
                }
            }

            let ids: Vec<String> = requested.iter().map(|id| id.to_string()).collect();
            let lookup = cache.lookup(&ids);
            prop_assert_eq!(
                lookup.hits.len() + lookup.missing.len() + lookup.errored.len(),
                ids.len()
            );

            let mut union: HashSet<String> = lookup.hits.iter().map(|r| r.id.clone()).collect();
            union.extend(lookup.missing.iter().cloned());
            union.extend(lookup.errored.iter().cloned());
            let expected: HashSet<String> = ids.iter().cloned().collect();
            prop_assert_eq!(union, expected);

            for id in &ids {
                let in_hits = lookup.hits.iter().any(|r| &r.id == id);
                let in_missing = lookup.missing.contains(id);
                let in_errored = lookup.errored.contains(id);
                prop_assert_eq!(
                    [in_hits, in_missing, in_errored].iter().filter(|b| **b).count(),
                    1
                );
                prop_assert_eq!(in_hits, cache.get_by_id(id).is_some());
                prop_assert_eq!(in_errored, cache.is_errored(id));
            }
        }
    }
}
