//! Fetch sagas
//!
//! Idempotent reads. Unless the request sets `ignore_cache`, a fetch whose data is
//! already known or already on the wire ends with [`Event::Skipped`] and changes
//! nothing.

use super::{announce, write_included, Event, Operation, SkipReason};
use crate::error::Error;
use crate::registry::Shared;
use crate::resource::{Document, Resource};
use crate::store::{id_list, QueryKey, TypeState};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

type Unpacked = (Vec<Resource>, BTreeMap<String, Vec<Resource>>);

fn unpack_document(document: &Document) -> Result<Unpacked, Error> {
    Ok((document.primary()?, document.included()?))
}

fn collection_guard(state: &TypeState, filter: &Value) -> Option<SkipReason> {
    match id_list(filter) {
        Some(ids) => {
            if ids.iter().all(|id| state.cache.is_known(id)) {
                return Some(SkipReason::AlreadyKnown);
            }
            let covered = ids
                .iter()
                .all(|id| state.cache.is_known(id) || state.is_fetching(&format!("id:{}", id)));
            covered.then_some(SkipReason::AlreadyFetching)
        }
        None => {
            if state.index.is_known(filter) {
                Some(SkipReason::AlreadyKnown)
            } else if state.is_fetching(&format!("query:{}", QueryKey::new(filter))) {
                Some(SkipReason::AlreadyFetching)
            } else {
                None
            }
        }
    }
}

fn individual_guard(state: &TypeState, id: &str) -> Option<SkipReason> {
    if state.cache.is_known(id) {
        Some(SkipReason::AlreadyKnown)
    } else if state.is_fetching(&format!("id:{}", id)) {
        Some(SkipReason::AlreadyFetching)
    } else {
        None
    }
}

fn skip(shared: &Shared, operation: Arc<Operation>, reason: SkipReason) {
    tracing::debug!("Skipping {}: {:?}", operation.action_type(), reason);
    shared.bus.publish(Event::Skipped {
        origin: operation,
        reason,
    });
}

/// Mark the fetch as on the wire and announce it
fn begin(shared: &Shared, operation: &Operation) -> Arc<Operation> {
    let initiated = Arc::new(operation.initiated());
    let keys = operation.in_flight_keys();
    let _ = shared.modify(&operation.resource_type, |state| state.begin_fetch(&keys));
    shared.bus.publish(Event::Initiated {
        origin: initiated.clone(),
    });
    initiated
}

fn succeed(shared: &Shared, operation: Arc<Operation>, result: Value) {
    shared.bus.publish(Event::Succeeded {
        origin: operation,
        result,
    });
}

fn fail(shared: &Shared, operation: Arc<Operation>, error: Error) {
    tracing::error!("{} failed: {}", operation.action_type(), error);
    shared.bus.publish(Event::Failed {
        origin: operation,
        error,
    });
}

pub(super) async fn collection(shared: &Shared, operation: Arc<Operation>) {
    let resource_type = operation.resource_type.clone();
    let filter = operation.filter();

    if !operation.meta.ignore_cache {
        let Ok(state) = shared.snapshot(&resource_type) else {
            return;
        };
        if let Some(reason) = collection_guard(&state, &filter) {
            skip(shared, operation, reason);
            return;
        }
    }

    let operation = begin(shared, &operation);
    let keys = operation.in_flight_keys();
    let requested = id_list(&filter);

    let outcome = shared
        .transport
        .fetch_collection(&resource_type, &filter)
        .await
        .map_err(Error::transport)
        .and_then(|document| unpack_document(&document));

    match outcome {
        Ok((primary, included)) => {
            let ids: Vec<String> = primary.iter().map(|r| r.id.clone()).collect();
            tracing::debug!(
                "{} returned {} resources",
                operation.action_type(),
                ids.len()
            );

            let _ = shared.modify(&resource_type, |state| {
                state.end_fetch(&keys);
                state.cache.put_many(primary.iter().cloned());
                // Ids asked for by name but not returned do not exist upstream.
                if let Some(requested) = &requested {
                    state
                        .cache
                        .put_errors(requested.iter().filter(|id| !ids.contains(*id)));
                }
                state.index.add_query_results(&filter, ids.clone());
            });

            write_included(shared, included);
            announce(shared, &primary);
            let result = Value::Array(primary.iter().map(Resource::to_value).collect());
            succeed(shared, operation, result);
        }
        Err(error) => {
            let _ = shared.modify(&resource_type, |state| {
                state.end_fetch(&keys);
                state.index.set_error(&filter);
                if let Some(requested) = &requested {
                    let unresolved: Vec<&String> = requested
                        .iter()
                        .filter(|id| state.cache.get_by_id(id).is_none())
                        .collect();
                    state.cache.put_errors(unresolved);
                }
            });
            fail(shared, operation, error);
        }
    }
}

pub(super) async fn individual(shared: &Shared, operation: Arc<Operation>) {
    let resource_type = operation.resource_type.clone();
    let Some(id) = operation.id() else {
        fail(
            shared,
            operation,
            Error::protocol("fetchIndividual payload is missing an id"),
        );
        return;
    };

    if !operation.meta.ignore_cache {
        let Ok(state) = shared.snapshot(&resource_type) else {
            return;
        };
        if let Some(reason) = individual_guard(&state, &id) {
            skip(shared, operation, reason);
            return;
        }
    }

    let operation = begin(shared, &operation);
    let keys = operation.in_flight_keys();

    let outcome = shared
        .transport
        .fetch_individual(&resource_type, &id)
        .await
        .map_err(Error::transport)
        .and_then(|document| unpack_document(&document))
        .and_then(|(primary, included)| match primary.into_iter().next() {
            Some(resource) => Ok((resource, included)),
            None => Err(Error::transport(anyhow::anyhow!(
                "empty response for {} {}",
                resource_type,
                id
            ))),
        });

    match outcome {
        Ok((resource, included)) => {
            let _ = shared.modify(&resource_type, |state| {
                state.end_fetch(&keys);
                state.cache.put(resource.clone());
            });

            write_included(shared, included);
            announce(shared, std::slice::from_ref(&resource));
            succeed(shared, operation, resource.to_value());
        }
        Err(error) => {
            let _ = shared.modify(&resource_type, |state| {
                state.end_fetch(&keys);
                state.cache.put_error(&id);
            });
            fail(shared, operation, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_guard_for_queries() {
        let mut state = TypeState::new("posts");
        let filter = json!({"author": "ann"});
        assert_eq!(collection_guard(&state, &filter), None);

        state.begin_fetch(&[format!("query:{}", QueryKey::new(&filter))]);
        assert_eq!(
            collection_guard(&state, &filter),
            Some(SkipReason::AlreadyFetching)
        );

        state.index.set_error(&filter);
        assert_eq!(collection_guard(&state, &filter), Some(SkipReason::AlreadyKnown));
    }

    #[test]
    fn test_collection_guard_for_id_lists() {
        let mut state = TypeState::new("posts");
        let filter = json!({"id": ["1", "2"]});
        state.cache.put(Resource::new("posts", "1"));
        assert_eq!(collection_guard(&state, &filter), None);

        state.begin_fetch(&["id:2".to_string()]);
        assert_eq!(
            collection_guard(&state, &filter),
            Some(SkipReason::AlreadyFetching)
        );

        state.cache.put_error("2");
        assert_eq!(collection_guard(&state, &filter), Some(SkipReason::AlreadyKnown));
    }

    #[test]
    fn test_individual_guard() {
        let mut state = TypeState::new("posts");
        assert_eq!(individual_guard(&state, "1"), None);

        state.begin_fetch(&["id:1".to_string()]);
        assert_eq!(individual_guard(&state, "1"), Some(SkipReason::AlreadyFetching));

        state.cache.put_error("1");
        assert_eq!(individual_guard(&state, "1"), Some(SkipReason::AlreadyKnown));
    }
}
