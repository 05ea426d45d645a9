//! Accessors
//!
//! Pure reads over a [`TypeState`] snapshot. A read either has its data, knows the
//! data failed to load, or describes the fetch that would load it:
//!
//! - [`Selection::Ready`] - the value
//! - [`Selection::Failed`] - the placeholder; the fetch already failed and is not retried
//! - [`Selection::Pending`] - a [`Miss`] with the fetch request and the placeholder
//!
//! Derived accessors compose with [`Selection::compose`] and `?` on
//! [`Selection::ready`], which propagates the first miss encountered.

use crate::resource::Resource;
use crate::saga::Operation;
use crate::store::{id_list, ProcessEntry, TypeState};
use serde_json::{json, Value};
use std::sync::Arc;

/// Data that is not loaded yet, and how to load it
#[derive(Debug, Clone)]
pub struct Miss<T> {
    pub description: String,
    pub request: Operation,
    pub placeholder: T,
}

#[derive(Debug, Clone)]
pub enum Selection<T> {
    Ready(T),
    Pending(Miss<T>),
    Failed(T),
}

/// A non-ready selection with its placeholder stripped, for `?` propagation
#[derive(Debug, Clone)]
pub enum Unresolved {
    Pending { description: String, request: Operation },
    Failed,
}

impl<T> Selection<T> {
    fn pending(description: String, request: Operation, placeholder: T) -> Self {
        Self::Pending(Miss {
            description,
            request,
            placeholder,
        })
    }

    pub fn ready(self) -> Result<T, Unresolved> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::Pending(miss) => Err(Unresolved::Pending {
                description: miss.description,
                request: miss.request,
            }),
            Self::Failed(_) => Err(Unresolved::Failed),
        }
    }

    /// Run a derived accessor, threading through the first non-ready read
    pub fn compose<F>(placeholder: T, f: F) -> Self
    where
        F: FnOnce() -> Result<T, Unresolved>,
    {
        match f() {
            Ok(value) => Self::Ready(value),
            Err(Unresolved::Pending {
                description,
                request,
            }) => Self::pending(description, request, placeholder),
            Err(Unresolved::Failed) => Self::Failed(placeholder),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// The value, or the placeholder when not ready
    pub fn value(self) -> T {
        match self {
            Self::Ready(value) | Self::Failed(value) => value,
            Self::Pending(miss) => miss.placeholder,
        }
    }

    pub fn request(&self) -> Option<&Operation> {
        match self {
            Self::Pending(miss) => Some(&miss.request),
            _ => None,
        }
    }

    pub fn map<U, F>(self, f: F) -> Selection<U>
    where
        F: Fn(T) -> U,
    {
        match self {
            Self::Ready(value) => Selection::Ready(f(value)),
            Self::Failed(value) => Selection::Failed(f(value)),
            Self::Pending(miss) => Selection::Pending(Miss {
                description: miss.description,
                request: miss.request,
                placeholder: f(miss.placeholder),
            }),
        }
    }
}

/// One resource by id
pub fn get_one(state: &TypeState, id: &str) -> Selection<Option<Arc<Resource>>> {
    if let Some(resource) = state.cache.get_by_id(id) {
        return Selection::Ready(Some(resource));
    }
    if state.cache.is_errored(id) {
        return Selection::Failed(None);
    }
    Selection::pending(
        format!("{} {}", state.resource_type, id),
        Operation::fetch_individual(&state.resource_type, id),
        None,
    )
}

/// Resources matching a filter descriptor, in server order
pub fn get_many(state: &TypeState, filter: &Value) -> Selection<Vec<Arc<Resource>>> {
    match id_list(filter) {
        Some(ids) => get_many_by_id(state, &ids),
        None => get_many_by_query(state, filter),
    }
}

pub fn get_all(state: &TypeState) -> Selection<Vec<Arc<Resource>>> {
    get_many(state, &json!({}))
}

// Id-list filters read the cache directly and only ask for what is missing.
fn get_many_by_id(state: &TypeState, ids: &[String]) -> Selection<Vec<Arc<Resource>>> {
    let lookup = state.cache.lookup(ids);

    if lookup.is_complete() {
        let ordered = ids
            .iter()
            .filter_map(|id| state.cache.get_by_id(id))
            .collect();
        return Selection::Ready(ordered);
    }

    if !lookup.missing.is_empty() {
        return Selection::pending(
            format!("{} {:?}", state.resource_type, lookup.missing),
            Operation::fetch_collection(&state.resource_type, json!({ "id": lookup.missing })),
            Vec::new(),
        );
    }

    Selection::Failed(Vec::new())
}

fn get_many_by_query(state: &TypeState, filter: &Value) -> Selection<Vec<Arc<Resource>>> {
    let description = format!("{} matching {}", state.resource_type, filter);

    if state.index.is_errored(filter) {
        return Selection::Failed(Vec::new());
    }

    let Some(ids) = state.index.get_results(filter) else {
        return Selection::pending(
            description,
            Operation::fetch_collection(&state.resource_type, filter.clone()),
            Vec::new(),
        );
    };

    let lookup = state.cache.lookup(ids);
    if !lookup.errored.is_empty() {
        return Selection::Failed(Vec::new());
    }
    if !lookup.missing.is_empty() {
        // The index outlived part of the cache; the guard would call it known.
        return Selection::pending(
            description,
            Operation::fetch_collection(&state.resource_type, filter.clone()).ignore_cache(),
            Vec::new(),
        );
    }

    Selection::Ready(ids.iter().filter_map(|id| state.cache.get_by_id(id)).collect())
}

/// Cache scan by attribute; never misses
pub fn get_by(state: &TypeState, attribute: &str, value: &Value) -> Option<Arc<Resource>> {
    state.cache.get_by(attribute, value)
}

/// Resources of `target`'s type linked from `resource` through `relationship`
pub fn get_related(
    target: &TypeState,
    resource: &Resource,
    relationship: &str,
) -> Selection<Vec<Arc<Resource>>> {
    let ids = resource.related_ids(relationship, &target.resource_type);
    if ids.is_empty() {
        return Selection::Ready(Vec::new());
    }
    get_many_by_id(target, &ids)
}

/// First resource of `target`'s type linked through `relationship`
pub fn get_related_one(
    target: &TypeState,
    resource: &Resource,
    relationship: &str,
) -> Selection<Option<Arc<Resource>>> {
    match resource
        .related_ids(relationship, &target.resource_type)
        .first()
    {
        Some(id) => get_one(target, id),
        None => Selection::Ready(None),
    }
}

pub fn get_process(state: &TypeState, operation: &str, pid: &str) -> ProcessEntry {
    state.processes.get(operation, pid)
}
