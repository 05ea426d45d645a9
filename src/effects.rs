//! Effect helpers
//!
//! Cooperative-scheduling primitives the orchestrator and callers build on:
//!
//! - [`spawn_queue`] - a FIFO channel drained by one long-lived task
//! - [`diligent_select`] - re-run an accessor until it stops missing
//! - [`run_to_completion`] - dispatch one operation and await its terminal event

use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::saga::{Event, Operation, SkipReason};
use crate::selectors::Selection;
use serde_json::Value;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Attempts `diligent_select` makes before giving up
pub const MAX_SELECT_ATTEMPTS: u32 = 10;

pub type QueueSender<T> = mpsc::UnboundedSender<T>;

/// Spawn a task that handles items strictly one at a time, in send order.
///
/// The task ends when every sender is dropped or the handler breaks.
pub fn spawn_queue<T, F, Fut>(mut handler: F) -> Result<QueueSender<T>>
where
    T: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = ControlFlow<()>> + Send + 'static,
{
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|_| Error::protocol("operations must be dispatched inside a tokio runtime"))?;

    let (sender, mut receiver) = mpsc::unbounded_channel();
    runtime.spawn(async move {
        while let Some(item) = receiver.recv().await {
            if handler(item).await.is_break() {
                break;
            }
        }
    });
    Ok(sender)
}

/// A fetch `diligent_select` dispatched and has not seen settle yet
struct Dispatched {
    resource_type: String,
    invocation: Uuid,
    keys: Vec<String>,
    /// Skipped as already fetching; settles with any overlapping fetch
    deferred: bool,
    /// An overlapping fetch ended before the skip arrived
    overlap_settled: bool,
}

impl Dispatched {
    fn new(operation: &Operation) -> Self {
        Self {
            resource_type: operation.resource_type.clone(),
            invocation: operation.meta.invocation,
            keys: operation.in_flight_keys(),
            deferred: false,
            overlap_settled: false,
        }
    }

    fn overlaps(&self, origin: &Operation) -> bool {
        origin.resource_type == self.resource_type
            && origin.kind.is_fetch()
            && origin
                .in_flight_keys()
                .iter()
                .any(|key| self.keys.contains(key))
    }
}

/// Wait until one of the `dispatched` fetches settles, then forget it.
///
/// A fetch settles on its own terminal event or its own already-known skip. One
/// skipped as already fetching settles when an overlapping fetch ends.
async fn settle(events: &mut broadcast::Receiver<Event>, dispatched: &mut Vec<Dispatched>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            // Missed events; the caller re-reads state anyway.
            Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => return,
        };
        let Some(origin) = event.origin() else {
            continue;
        };
        let own = dispatched
            .iter()
            .position(|fetch| fetch.invocation == origin.meta.invocation);

        let settled = match (&event, own) {
            (Event::Succeeded { .. } | Event::Failed { .. }, Some(position)) => Some(position),
            (Event::Succeeded { .. } | Event::Failed { .. }, None) => {
                let mut settled = None;
                for (position, fetch) in dispatched.iter_mut().enumerate() {
                    if !fetch.overlaps(origin) {
                        continue;
                    }
                    if fetch.deferred {
                        settled = Some(position);
                        break;
                    }
                    fetch.overlap_settled = true;
                }
                settled
            }
            (Event::Skipped { reason, .. }, Some(position)) => match reason {
                SkipReason::AlreadyKnown => Some(position),
                SkipReason::AlreadyFetching => {
                    let fetch = &mut dispatched[position];
                    fetch.deferred = true;
                    fetch.overlap_settled.then_some(position)
                }
            },
            _ => None,
        };

        if let Some(position) = settled {
            dispatched.remove(position);
            return;
        }
    }
}

/// Re-run `selector` until it is ready or known failed.
///
/// On a miss the embedded fetch is dispatched and the helper suspends until that
/// fetch settles or `terminal_timeout` passes. Fetches that outlive their timeout
/// are still watched, so a slow queue ends a later wait instead of piling up
/// attempts. Attempt `n` first waits `n × retry_increment`. After
/// [`MAX_SELECT_ATTEMPTS`] misses the accessor is considered unsatisfiable.
pub async fn diligent_select<T, F>(registry: &Registry, mut selector: F) -> Result<T>
where
    F: FnMut(&Registry) -> Result<Selection<T>>,
{
    let settings = registry.settings().clone();
    let mut events = registry.subscribe();
    let mut dispatched = Vec::new();
    let mut last_miss = String::new();

    for attempt in 0..MAX_SELECT_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(settings.retry_increment * attempt).await;
        }

        match selector(registry)? {
            Selection::Ready(value) | Selection::Failed(value) => return Ok(value),
            Selection::Pending(miss) => {
                tracing::debug!("Attempt {}: waiting for {}", attempt + 1, miss.description);
                last_miss = miss.description;

                let accepted = registry.dispatch(miss.request)?;
                dispatched.push(Dispatched::new(&accepted));
                let settled = tokio::time::timeout(
                    settings.terminal_timeout,
                    settle(&mut events, &mut dispatched),
                )
                .await;
                if settled.is_err() {
                    tracing::debug!("Timed out waiting for {}", last_miss);
                }
            }
        }
    }

    Err(Error::Unresolvable {
        description: last_miss,
    })
}

/// Dispatch `operation` and wait for its own terminal event.
///
/// Fetches must set `ignore_cache`; otherwise the guards could answer them from
/// cache without ever producing a terminal event. Already-initiated operations are
/// internal and rejected.
pub async fn run_to_completion(registry: &Registry, operation: Operation) -> Result<Value> {
    if operation.meta.initiated {
        return Err(Error::protocol(format!(
            "{} is an initiated sub-operation, not a top-level request",
            operation.action_type()
        )));
    }
    if operation.kind.is_fetch() && !operation.meta.ignore_cache {
        return Err(Error::protocol(format!(
            "{} must set ignore_cache to be awaited",
            operation.action_type()
        )));
    }

    let mut events = registry.subscribe();
    let accepted: Arc<Operation> = registry.dispatch(operation)?;

    loop {
        match events.recv().await {
            Ok(Event::Succeeded { origin, result }) if origin.meta.invocation == accepted.meta.invocation => {
                return Ok(result);
            }
            Ok(Event::Failed { origin, error }) if origin.meta.invocation == accepted.meta.invocation => {
                return Err(error);
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    "Missed {} events while waiting for {}",
                    skipped,
                    accepted.action_type()
                );
                if !accepted.kind.is_fetch() {
                    let entry = registry
                        .state(&accepted.resource_type)?
                        .processes
                        .get(accepted.kind.name(), accepted.pid());
                    if entry.status.is_terminal() {
                        return match entry.result {
                            Some(result) => Ok(result),
                            None => Err(Error::transport(anyhow::anyhow!(
                                "{} failed while its events were missed",
                                accepted.action_type()
                            ))),
                        };
                    }
                }
            }
            Err(broadcast::error::RecvError::Closed) => return Err(Error::TerminalTimeout),
        }
    }
}
