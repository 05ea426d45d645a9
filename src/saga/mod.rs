//! Orchestrator
//!
//! Every `(resource type, operation kind)` pair owns a FIFO queue drained by one
//! worker task, so operations that could race on the same store run one at a time
//! in dispatch order while unrelated queues proceed concurrently.
//!
//! - [`operation`] - operation-start requests
//! - [`event`] - lifecycle events and the bus
//! - `fetch` - collection and individual fetches
//! - `mutate` - create, update, destroy and custom actions
//!
//! Mutations are validated and checked for pid collisions synchronously in
//! [`dispatch`]; only accepted operations reach a queue.

mod event;
mod fetch;
mod mutate;
mod operation;

pub use event::{Event, EventBus, SkipReason};
pub use operation::{Meta, Operation, OperationKind, DEFAULT_PID};

use crate::error::{Error, Result};
use crate::registry::Shared;
use crate::resource::{pack, ActionKind, Resource, ResourceConfig};
use crate::store::{ProcessStatus, ProcessUpdate};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reject malformed operations before anything is touched
fn validate(config: &ResourceConfig, operation: &Operation) -> Result<()> {
    let resource_type = &operation.resource_type;
    let enabled = match &operation.kind {
        OperationKind::FetchCollection => config.fetch_collection,
        OperationKind::FetchIndividual => config.fetch_individual,
        OperationKind::Create => config.create,
        OperationKind::Update => config.update,
        OperationKind::Destroy => config.destroy,
        OperationKind::Action(name) => config.action(name).is_some(),
    };
    if !enabled {
        return Err(Error::OperationDisabled {
            resource_type: resource_type.clone(),
            operation: operation.kind.name().to_string(),
        });
    }

    let needs_id = |what: &str| match operation.id() {
        Some(_) => Ok(()),
        None => Err(Error::protocol(format!(
            "{} payload for {} is missing an id",
            what, resource_type
        ))),
    };

    match &operation.kind {
        OperationKind::FetchCollection => {
            if !(operation.payload.is_object() || operation.payload.is_null()) {
                return Err(Error::protocol(format!(
                    "filter for {} must be an object",
                    resource_type
                )));
            }
        }
        OperationKind::FetchIndividual => needs_id("fetchIndividual")?,
        OperationKind::Create => {
            if operation.payload.get("id").is_some_and(|id| !id.is_null()) {
                return Err(Error::protocol(format!(
                    "create payload for {} must not contain an id",
                    resource_type
                )));
            }
            pack(resource_type, &operation.payload)?;
        }
        OperationKind::Update => {
            needs_id("update")?;
            pack(resource_type, &operation.payload)?;
        }
        OperationKind::Destroy => needs_id("destroy")?,
        OperationKind::Action(name) => {
            let kind = config.action(name).map(|action| action.kind);
            if kind == Some(ActionKind::Individual) {
                needs_id(name)?;
            }
        }
    }
    Ok(())
}

/// Accept an operation for execution.
///
/// Fetches are queued as they are. Mutations are checked against the process
/// tracker: a `Running` process under the same `(operation, pid)` fails the new
/// request immediately with [`Error::DuplicatePid`], without touching the tracker
/// and without a network call. Otherwise the process is marked `Running` before
/// this returns, so the collision check holds even while the request waits in its
/// queue.
pub(crate) fn dispatch(shared: &Arc<Shared>, operation: Operation) -> Result<Arc<Operation>> {
    if operation.meta.initiated {
        return Err(Error::protocol(format!(
            "{} is already initiated and cannot be dispatched again",
            operation.action_type()
        )));
    }

    let slot = shared.slot(&operation.resource_type)?;
    validate(&slot.config, &operation)?;

    let queue = shared.queue((operation.resource_type.clone(), operation.kind.clone()))?;

    if operation.kind.is_fetch() {
        let operation = Arc::new(operation);
        tracing::debug!("Queueing {}", operation.action_type());
        queue
            .send(operation.clone())
            .map_err(|_| Error::protocol("orchestrator queue is closed"))?;
        return Ok(operation);
    }

    let name = operation.kind.name().to_string();
    let pid = operation.pid().to_string();

    let mut collided = false;
    slot.state.send_if_modified(|state| {
        if state.processes.is_running(&name, &pid) {
            collided = true;
            // Never initiated, so the tracker ignores it.
            return Arc::make_mut(state).processes.update(
                ProcessUpdate::new(&name, &pid, ProcessStatus::Errored).not_initiated(),
            );
        }
        Arc::make_mut(state)
            .processes
            .update(ProcessUpdate::new(&name, &pid, ProcessStatus::Running))
    });

    if collided {
        let error = Error::DuplicatePid {
            operation: name,
            pid,
        };
        tracing::warn!("Rejected {}: {}", operation.action_type(), error);
        shared.bus.publish(Event::Failed {
            origin: Arc::new(operation),
            error: error.clone(),
        });
        return Err(error);
    }

    let operation = Arc::new(operation.initiated());
    tracing::debug!("Queueing {} (pid {})", operation.action_type(), pid);
    shared.bus.publish(Event::Initiated {
        origin: operation.clone(),
    });

    if queue.send(operation.clone()).is_err() {
        let error = Error::protocol("orchestrator queue is closed");
        let _ = shared.modify(&operation.resource_type, |state| {
            state
                .processes
                .update(ProcessUpdate::new(&name, &pid, ProcessStatus::Errored));
        });
        shared.bus.publish(Event::Failed {
            origin: operation,
            error: error.clone(),
        });
        return Err(error);
    }

    Ok(operation)
}

/// Worker body: run one dequeued operation to its terminal event
pub(crate) async fn execute(shared: &Shared, operation: Arc<Operation>) {
    tracing::debug!(
        "Executing {} ({})",
        operation.action_type(),
        operation.meta.invocation
    );

    let kind = operation.kind.clone();
    match kind {
        OperationKind::FetchCollection => fetch::collection(shared, operation).await,
        OperationKind::FetchIndividual => fetch::individual(shared, operation).await,
        _ => mutate::run(shared, operation).await,
    }
}

/// Write included resources through to their own types' caches
fn write_included(shared: &Shared, included: BTreeMap<String, Vec<Resource>>) {
    for (resource_type, resources) in included {
        if shared.slot(&resource_type).is_err() {
            tracing::warn!(
                "Skipping {} included resources of unregistered type {}",
                resources.len(),
                resource_type
            );
            continue;
        }

        let _ = shared.modify(&resource_type, |state| {
            state.cache.put_many(resources.iter().cloned());
        });
        announce(shared, &resources);
    }
}

fn announce(shared: &Shared, resources: &[Resource]) {
    for resource in resources {
        shared.bus.publish(Event::Fetched {
            resource: Arc::new(resource.clone()),
        });
    }
}
