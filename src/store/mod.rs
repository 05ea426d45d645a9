//! Per-type stores
//!
//! - [`cache`] - resources by id
//! - [`index`] - query results by canonical filter
//! - [`process`] - named-operation state by `(operation, pid)`
//!
//! The three live together in a [`TypeState`] value, one per resource type. The
//! registry holds each as `Arc<TypeState>` and writes through `Arc::make_mut`, so a
//! snapshot handed to a reader never changes underneath it.

mod cache;
mod index;
mod process;

pub use cache::{CacheEntry, Lookup, ResourceCache};
pub use index::{canonicalize, id_list, IndexEntry, QueryKey, ResourceIndex};
pub use process::{ProcessEntry, ProcessStatus, ProcessTracker, ProcessUpdate};

use std::collections::HashMap;

/// Everything known about one resource type
#[derive(Debug, Clone, PartialEq)]
pub struct TypeState {
    pub resource_type: String,
    pub cache: ResourceCache,
    pub index: ResourceIndex,
    pub processes: ProcessTracker,
    /// Request keys of fetches currently on the wire, with their counts
    pub in_flight: HashMap<String, usize>,
}

impl TypeState {
    pub fn new(resource_type: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            cache: ResourceCache::new(),
            index: ResourceIndex::new(),
            processes: ProcessTracker::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Drop every cached resource and query result
    pub fn invalidate(&mut self) {
        self.cache.clear();
        self.index.clear();
    }

    pub fn is_fetching(&self, request_key: &str) -> bool {
        self.in_flight.contains_key(request_key)
    }

    pub fn begin_fetch(&mut self, keys: &[String]) {
        for key in keys {
            *self.in_flight.entry(key.clone()).or_insert(0) += 1;
        }
    }

    pub fn end_fetch(&mut self, keys: &[String]) {
        for key in keys {
            if let Some(count) = self.in_flight.get_mut(key) {
                *count -= 1;
                if *count == 0 {
                    self.in_flight.remove(key);
                }
            }
        }
    }
}
