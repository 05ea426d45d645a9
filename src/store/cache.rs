//! Resource cache
//!
//! Content-addressed store of one resource type, keyed by id. Every entry is either a
//! resource or an error marker; an error entry is terminal until a fresh successful
//! write for the same id replaces it.

use crate::resource::Resource;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One cached id
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub id: String,
    /// Always `None` when `error` is set
    pub resource: Option<Arc<Resource>>,
    pub error: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partition of a requested id sequence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lookup {
    /// Cached resources; order is not guaranteed to follow the request
    pub hits: Vec<Arc<Resource>>,
    pub missing: Vec<String>,
    pub errored: Vec<String>,
}

impl Lookup {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.errored.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceCache {
    entries: HashMap<String, CacheEntry>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&mut self, id: &str, resource: Option<Arc<Resource>>) {
        let now = Utc::now();
        let error = resource.is_none();
        self.entries
            .entry(id.to_string())
            .and_modify(|entry| {
                entry.resource = resource.clone();
                entry.error = error;
                entry.updated_at = now;
            })
            .or_insert_with(|| CacheEntry {
                id: id.to_string(),
                resource,
                error,
                created_at: now,
                updated_at: now,
            });
    }

    /// Store a resource, clearing any error for its id
    pub fn put(&mut self, resource: Resource) {
        let id = resource.id.clone();
        self.write(&id, Some(Arc::new(resource)));
    }

    pub fn put_many(&mut self, resources: impl IntoIterator<Item = Resource>) {
        for resource in resources {
            self.put(resource);
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<CacheEntry> {
        self.entries.remove(id)
    }

    /// Mark an id as failed, dropping any resource stored for it
    pub fn put_error(&mut self, id: &str) {
        self.write(id, None);
    }

    pub fn put_errors<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in ids {
            self.put_error(id.as_ref());
        }
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn is_errored(&self, id: &str) -> bool {
        self.entries.get(id).is_some_and(|entry| entry.error)
    }

    pub fn entry(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<Resource>> {
        self.entries.get(id).and_then(|entry| entry.resource.clone())
    }

    /// First cached resource whose `attribute` equals `value`
    pub fn get_by(&self, attribute: &str, value: &Value) -> Option<Arc<Resource>> {
        self.entries
            .values()
            .filter_map(|entry| entry.resource.as_ref())
            .find(|resource| resource.attribute(attribute).as_ref() == Some(value))
            .cloned()
    }

    /// Split `ids` into hits, missing and errored in one pass
    pub fn lookup<S: AsRef<str>>(&self, ids: &[S]) -> Lookup {
        let mut result = Lookup::default();
        for id in ids {
            let id = id.as_ref();
            match self.entries.get(id) {
                None => result.missing.push(id.to_string()),
                Some(entry) => match &entry.resource {
                    Some(resource) if !entry.error => result.hits.push(resource.clone()),
                    _ => result.errored.push(id.to_string()),
                },
            }
        }
        result
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

    fn post(id: &str, title: &str) -> Resource {
        Resource::new("posts", id).with_attribute("title", json!(title))
    }

    #[test]
    fn test_put_and_get() {
        let mut cache = ResourceCache::new();
        cache.put(post("1", "first"));

        assert!(cache.is_known("1"));
        assert!(!cache.is_errored("1"));
        assert_eq!(cache.get_by_id("1").unwrap().attributes["title"], "first");
        assert!(cache.get_by_id("2").is_none());
    }

    #[test]
    fn test_error_overwrites_success_and_back() {
        let mut cache = ResourceCache::new();
        cache.put(post("1", "first"));
        let created = cache.entry("1").unwrap().created_at;

        cache.put_error("1");
        assert!(cache.is_errored("1"));
        assert!(cache.get_by_id("1").is_none());
        assert!(cache.entry("1").unwrap().resource.is_none());

        cache.put(post("1", "again"));
        assert!(!cache.is_errored("1"));
        assert_eq!(cache.get_by_id("1").unwrap().attributes["title"], "again");
        assert_eq!(cache.entry("1").unwrap().created_at, created);
    }

    #[test]
    fn test_get_by_attribute() {
        let mut cache = ResourceCache::new();
        cache.put_many(vec![post("1", "first"), post("2", "second")]);
        cache.put_error("3");

        assert_eq!(cache.get_by("title", &json!("second")).unwrap().id, "2");
        assert_eq!(cache.get_by("id", &json!("1")).unwrap().id, "1");
        assert!(cache.get_by("title", &json!("third")).is_none());
    }

    #[test]
    fn test_lookup_partitions_ids() {
        let mut cache = ResourceCache::new();
        cache.put_many(vec![post("1", "a"), post("2", "b")]);
        cache.put_errors(["3"]);

        let result = cache.lookup(&["1", "3", "4", "2"]);
        let mut hit_ids: Vec<_> = result.hits.iter().map(|r| r.id.as_str()).collect();
        hit_ids.sort();
        assert_eq!(hit_ids, vec!["1", "2"]);
        assert_eq!(result.missing, vec!["4"]);
        assert_eq!(result.errored, vec!["3"]);
        assert!(!result.is_complete());
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = ResourceCache::new();
        cache.put_many(vec![post("1", "a"), post("2", "b")]);

        assert!(cache.remove("1").is_some());
        assert!(!cache.is_known("1"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
