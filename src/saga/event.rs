//! Event bus
//!
//! Broadcast of lifecycle notifications. Helpers subscribe and filter by
//! invocation or correlation token; lagging subscribers resynchronise by
//! re-reading state.

use super::operation::Operation;
use crate::error::Error;
use crate::resource::Resource;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyFetching,
    AlreadyKnown,
}

#[derive(Debug, Clone)]
pub enum Event {
    /// The operation was accepted and its request is about to go out
    Initiated { origin: Arc<Operation> },
    Succeeded { origin: Arc<Operation>, result: Value },
    Failed { origin: Arc<Operation>, error: Error },
    /// A fetch was answered by the guards without a network call
    Skipped { origin: Arc<Operation>, reason: SkipReason },
    /// A resource was written to its type's cache
    Fetched { resource: Arc<Resource> },
    /// A type's cache and index were cleared
    Invalidated { resource_type: String },
}

impl Event {
    pub fn origin(&self) -> Option<&Arc<Operation>> {
        match self {
            Self::Initiated { origin }
            | Self::Succeeded { origin, .. }
            | Self::Failed { origin, .. }
            | Self::Skipped { origin, .. } => Some(origin),
            Self::Fetched { .. } | Self::Invalidated { .. } => None,
        }
    }

    /// Succeeded or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: Event) {
        tracing::trace!("event: {:?}", event);
        // No subscribers is fine; state is the source of truth.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let origin = Arc::new(Operation::fetch_individual("posts", "1"));

        bus.publish(Event::Succeeded {
            origin: origin.clone(),
            result: json!([]),
        });

        let event = rx.recv().await.unwrap();
        assert!(event.is_terminal());
        assert_eq!(event.origin().unwrap().meta.invocation, origin.meta.invocation);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(0);
        bus.publish(Event::Invalidated {
            resource_type: "posts".into(),
        });
    }
}
