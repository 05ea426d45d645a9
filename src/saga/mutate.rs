//! Mutation sagas
//!
//! Create, update, destroy and custom actions. By the time a mutation is dequeued
//! its process is already `Running`; this module performs the request and drives
//! the process to `Completed` or `Errored`.
//!
//! Create, update and destroy always invalidate their own type and every
//! configured dependent. Custom actions consult their [`Invalidation`].
//!
//! [`Invalidation`]: crate::resource::Invalidation

use super::{write_included, Event, Operation, OperationKind};
use crate::error::{Error, Result};
use crate::registry::Shared;
use crate::resource::{pack, ActionConfig, ActionKind, Document, Resource, ResourceConfig};
use crate::store::{ProcessStatus, ProcessUpdate};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

struct Outcome {
    result: Value,
    included: BTreeMap<String, Vec<Resource>>,
}

impl Outcome {
    fn from_document(document: &Document, fallback: Value) -> Result<Self> {
        let result = document
            .primary()?
            .into_iter()
            .next()
            .map(|resource| resource.to_value())
            .unwrap_or(fallback);
        Ok(Self {
            result,
            included: document.included()?,
        })
    }

    fn plain(result: Value) -> Self {
        Self {
            result,
            included: BTreeMap::new(),
        }
    }
}

fn require_id(operation: &Operation) -> Result<String> {
    operation.id().ok_or_else(|| {
        Error::protocol(format!(
            "{} payload is missing an id",
            operation.action_type()
        ))
    })
}

async fn call(shared: &Shared, operation: &Operation, action: Option<&ActionConfig>) -> Result<Outcome> {
    let transport = &shared.transport;
    let resource_type = operation.resource_type.as_str();

    match &operation.kind {
        OperationKind::Create => {
            let body = pack(resource_type, &operation.payload)?;
            let document = transport
                .create(resource_type, &body)
                .await
                .map_err(Error::transport)?;
            Outcome::from_document(&document, Value::Null)
        }
        OperationKind::Update => {
            let id = require_id(operation)?;
            let body = pack(resource_type, &operation.payload)?;
            let document = transport
                .update(resource_type, &id, &body)
                .await
                .map_err(Error::transport)?;
            Outcome::from_document(&document, operation.payload.clone())
        }
        OperationKind::Destroy => {
            let id = require_id(operation)?;
            transport
                .destroy(resource_type, &id)
                .await
                .map_err(Error::transport)?;
            Ok(Outcome::plain(json!({ "id": id })))
        }
        OperationKind::Action(name) => {
            let id = match action.map(|action| action.kind) {
                Some(ActionKind::Individual) => Some(require_id(operation)?),
                _ => None,
            };
            let result = transport
                .action(resource_type, name, id.as_deref(), &operation.arguments())
                .await
                .map_err(Error::transport)?;
            Ok(Outcome::plain(result))
        }
        OperationKind::FetchCollection | OperationKind::FetchIndividual => Err(Error::protocol(
            format!("{} is not a mutation", operation.action_type()),
        )),
    }
}

/// Clear this type and its dependents
fn invalidate(shared: &Shared, resource_type: &str, config: &ResourceConfig) {
    shared.invalidate(resource_type);
    for dependent in config.invalidates.iter().filter(|t| *t != resource_type) {
        shared.invalidate(dependent);
    }
}

pub(super) async fn run(shared: &Shared, operation: Arc<Operation>) {
    let resource_type = operation.resource_type.clone();
    let name = operation.kind.name().to_string();
    let pid = operation.pid().to_string();

    let Ok(config) = shared.slot(&resource_type).map(|slot| slot.config.clone()) else {
        return;
    };
    let action = match &operation.kind {
        OperationKind::Action(action) => config.action(action).cloned(),
        _ => None,
    };

    match call(shared, &operation, action.as_ref()).await {
        Ok(outcome) => {
            let invalidates = match &action {
                Some(action) => action.invalidation.applies(&outcome.result),
                None => true,
            };
            if invalidates {
                invalidate(shared, &resource_type, &config);
            }
            write_included(shared, outcome.included);

            let _ = shared.modify(&resource_type, |state| {
                state.processes.update(
                    ProcessUpdate::new(&name, &pid, ProcessStatus::Completed)
                        .with_result(outcome.result.clone()),
                );
            });
            tracing::info!("{} completed (pid {})", operation.action_type(), pid);
            shared.bus.publish(Event::Succeeded {
                origin: operation,
                result: outcome.result,
            });
        }
        Err(error) => {
            tracing::error!(
                "{} failed (pid {}): {}",
                operation.action_type(),
                pid,
                error
            );
            let _ = shared.modify(&resource_type, |state| {
                state
                    .processes
                    .update(ProcessUpdate::new(&name, &pid, ProcessStatus::Errored));
            });
            if action.as_ref().is_some_and(|action| action.invalidate_on_fail) {
                invalidate(shared, &resource_type, &config);
            }
            shared.bus.publish(Event::Failed {
                origin: operation,
                error,
            });
        }
    }
}
