//! Query-result index
//!
//! Maps a canonicalized filter descriptor to the ordered id sequence it last
//! resolved to. Ids keep server order and are never deduplicated.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Canonical form of a filter descriptor.
///
/// Empty nested objects are stripped recursively (`{filters: {}}` becomes `{}`) so
/// logically identical queries collide. Empty arrays are kept: `{id: []}` asks for
/// nothing, which is not the same as asking for everything. Key order comes from
/// `serde_json::Map`, which is sorted.
pub fn canonicalize(filter: &Value) -> Value {
    match filter {
        Value::Object(map) => Value::Object(strip_empty(map)),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn strip_empty(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter_map(|(key, value)| match canonicalize(value) {
            Value::Object(inner) if inner.is_empty() => None,
            canonical => Some((key.clone(), canonical)),
        })
        .collect()
}

/// Index key: compact serialization of the canonical filter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn new(filter: &Value) -> Self {
        Self(canonicalize(filter).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ids of a pure id-list filter (`{"id": [..]}` and nothing else)
pub fn id_list(filter: &Value) -> Option<Vec<String>> {
    let Value::Object(map) = canonicalize(filter) else {
        return None;
    };
    if map.len() != 1 {
        return None;
    }
    let ids = map.get("id")?.as_array()?;
    ids.iter()
        .map(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub key: QueryKey,
    pub ids: Option<Vec<String>>,
    pub error: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceIndex {
    entries: HashMap<QueryKey, IndexEntry>,
}

impl ResourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(&mut self, filter: &Value, apply: impl FnOnce(&mut IndexEntry)) {
        let key = QueryKey::new(filter);
        let now = Utc::now();
        let entry = self.entries.entry(key.clone()).or_insert_with(|| IndexEntry {
            key,
            ids: None,
            error: false,
            created_at: now,
            updated_at: now,
        });
        apply(entry);
        entry.updated_at = now;
    }

    /// Record a successful query, clearing any previous error
    pub fn add_query_results(&mut self, filter: &Value, ids: Vec<String>) {
        self.upsert(filter, |entry| {
            entry.ids = Some(ids);
            entry.error = false;
        });
    }

    /// Record a failed query. Previously stored ids stay readable.
    pub fn set_error(&mut self, filter: &Value) {
        self.upsert(filter, |entry| entry.error = true);
    }

    pub fn is_known(&self, filter: &Value) -> bool {
        self.entries.contains_key(&QueryKey::new(filter))
    }

    pub fn is_errored(&self, filter: &Value) -> bool {
        self.entries
            .get(&QueryKey::new(filter))
            .is_some_and(|entry| entry.error)
    }

    pub fn get_results(&self, filter: &Value) -> Option<&[String]> {
        self.entries
            .get(&QueryKey::new(filter))
            .and_then(|entry| entry.ids.as_deref())
    }

    pub fn entry(&self, filter: &Value) -> Option<&IndexEntry> {
        self.entries.get(&QueryKey::new(filter))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_nested_objects_collapse() {
        assert_eq!(QueryKey::new(&json!({"filters": {}})), QueryKey::new(&json!({})));
        assert_eq!(
            QueryKey::new(&json!({"a": {"b": {"c": {}}}})),
            QueryKey::new(&json!({}))
        );
    }

    #[test]
    fn test_empty_arrays_are_kept() {
        assert_ne!(
            QueryKey::new(&json!({"filters": {"ids": []}})),
            QueryKey::new(&json!({}))
        );
        assert_eq!(
            canonicalize(&json!({"filters": {"ids": [], "x": {}}})),
            json!({"filters": {"ids": []}})
        );
    }

    #[test]
    fn test_objects_inside_arrays_are_canonicalized() {
        assert_eq!(
            canonicalize(&json!({"or": [{"a": 1, "b": {}}, {}]})),
            json!({"or": [{"a": 1}, {}]})
        );
    }

    #[test]
    fn test_key_ignores_field_order() {
        let mut forward = Map::new();
        forward.insert("a".into(), json!(1));
        forward.insert("b".into(), json!(2));
        let mut backward = Map::new();
        backward.insert("b".into(), json!(2));
        backward.insert("a".into(), json!(1));

        assert_eq!(
            QueryKey::new(&Value::Object(forward)),
            QueryKey::new(&Value::Object(backward))
        );
    }

    #[test]
    fn test_id_list_detection() {
        assert_eq!(id_list(&json!({"id": ["2", 4]})), Some(vec!["2".into(), "4".into()]));
        assert_eq!(id_list(&json!({"id": ["2"], "filters": {}})), Some(vec!["2".into()]));
        assert_eq!(id_list(&json!({"id": ["2"], "author": "x"})), None);
        assert_eq!(id_list(&json!({"id": "2"})), None);
        assert_eq!(id_list(&json!({})), None);
    }

    #[test]
    fn test_results_and_errors() {
        let mut index = ResourceIndex::new();
        let filter = json!({"author": "ann"});
        assert!(!index.is_known(&filter));

        index.add_query_results(&filter, vec!["a".into(), "b".into(), "c".into()]);
        assert!(index.is_known(&filter));
        assert!(!index.is_errored(&filter));
        assert_eq!(index.get_results(&filter).unwrap(), ["a", "b", "c"]);

        index.set_error(&filter);
        assert!(index.is_errored(&filter));
        assert_eq!(index.get_results(&filter).unwrap(), ["a", "b", "c"]);

        index.add_query_results(&filter, vec!["c".into(), "c".into()]);
        assert!(!index.is_errored(&filter));
        assert_eq!(index.get_results(&filter).unwrap(), ["c", "c"]);
    }

    #[test]
    fn test_error_without_results() {
        let mut index = ResourceIndex::new();
        index.set_error(&json!({"filters": {}}));
        assert!(index.is_known(&json!({})));
        assert!(index.is_errored(&json!({})));
        assert!(index.get_results(&json!({})).is_none());
    }
}
