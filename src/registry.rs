//! Registry
//!
//! The context object every component reaches through: one state cell per resource
//! type, the event bus, the orchestrator queues and the transport. Construct it once
//! at startup and clone the handle freely; clones share everything.

use crate::effects::{self, QueueSender};
use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceConfig};
use crate::saga::{self, Event, EventBus, Operation, OperationKind};
use crate::selectors::{self, Selection};
use crate::store::{ProcessEntry, TypeState};
use crate::transport::Transport;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Timing and capacity knobs
#[derive(Debug, Clone)]
pub struct Settings {
    /// Backoff step of `diligent_select`: attempt `n` waits `n` steps
    pub retry_increment: Duration,
    /// How long a helper waits for a terminal event before re-reading
    pub terminal_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry_increment: Duration::from_millis(100),
            terminal_timeout: Duration::from_secs(10),
            event_capacity: 1024,
        }
    }
}

pub(crate) struct TypeSlot {
    pub(crate) config: ResourceConfig,
    pub(crate) state: watch::Sender<Arc<TypeState>>,
}

pub(crate) type QueueKey = (String, OperationKind);

pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) types: HashMap<String, TypeSlot>,
    pub(crate) bus: EventBus,
    pub(crate) queues: Mutex<HashMap<QueueKey, QueueSender<Arc<Operation>>>>,
    pub(crate) settings: Settings,
}

impl Shared {
    pub(crate) fn slot(&self, resource_type: &str) -> Result<&TypeSlot> {
        self.types
            .get(resource_type)
            .ok_or_else(|| Error::UnknownResourceType(resource_type.to_string()))
    }

    pub(crate) fn snapshot(&self, resource_type: &str) -> Result<Arc<TypeState>> {
        Ok(self.slot(resource_type)?.state.borrow().clone())
    }

    /// Copy-on-write update of one type's state
    pub(crate) fn modify<F>(&self, resource_type: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut TypeState),
    {
        let slot = self.slot(resource_type)?;
        slot.state.send_modify(|state| f(Arc::make_mut(state)));
        Ok(())
    }

    /// Clear a type's cache and index and announce it
    pub(crate) fn invalidate(&self, resource_type: &str) {
        match self.modify(resource_type, TypeState::invalidate) {
            Ok(()) => {
                tracing::info!("Invalidated {}", resource_type);
                self.bus.publish(Event::Invalidated {
                    resource_type: resource_type.to_string(),
                });
            }
            Err(e) => tracing::warn!("Cannot invalidate {}: {}", resource_type, e),
        }
    }

    /// Queue sender for `(type, kind)`, spawning its worker on first use
    pub(crate) fn queue(self: &Arc<Self>, key: QueueKey) -> Result<QueueSender<Arc<Operation>>> {
        let mut queues = self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sender) = queues.get(&key) {
            if !sender.is_closed() {
                return Ok(sender.clone());
            }
        }

        tracing::debug!("Starting worker for {} {}", key.0, key.1.name());
        let shared = Arc::downgrade(self);
        let sender = effects::spawn_queue(move |operation: Arc<Operation>| {
            let shared = shared.clone();
            async move {
                let Some(shared) = shared.upgrade() else {
                    return std::ops::ControlFlow::Break(());
                };
                saga::execute(&shared, operation).await;
                std::ops::ControlFlow::Continue(())
            }
        })?;
        queues.insert(key, sender.clone());
        Ok(sender)
    }
}

/// Builder for [`Registry`]
pub struct RegistryBuilder {
    transport: Arc<dyn Transport>,
    resources: BTreeMap<String, ResourceConfig>,
    settings: Settings,
}

impl RegistryBuilder {
    pub fn resource(mut self, resource_type: &str, config: ResourceConfig) -> Self {
        self.resources.insert(resource_type.to_string(), config);
        self
    }

    pub fn resources(mut self, resources: BTreeMap<String, ResourceConfig>) -> Self {
        self.resources.extend(resources);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<Registry> {
        let mut types = HashMap::new();
        for (resource_type, config) in &self.resources {
            config.validate(resource_type)?;
            for dependent in &config.invalidates {
                if !self.resources.contains_key(dependent) {
                    tracing::warn!(
                        "{} invalidates unknown resource type {}",
                        resource_type,
                        dependent
                    );
                }
            }
            let (state, _) = watch::channel(Arc::new(TypeState::new(resource_type)));
            types.insert(
                resource_type.clone(),
                TypeSlot {
                    config: config.clone(),
                    state,
                },
            );
        }

        Ok(Registry {
            shared: Arc::new(Shared {
                transport: self.transport,
                types,
                bus: EventBus::new(self.settings.event_capacity),
                queues: Mutex::new(HashMap::new()),
                settings: self.settings,
            }),
        })
    }
}

/// Entry point for reads and operations
#[derive(Clone)]
pub struct Registry {
    pub(crate) shared: Arc<Shared>,
}

impl Registry {
    pub fn builder(transport: Arc<dyn Transport>) -> RegistryBuilder {
        RegistryBuilder {
            transport,
            resources: BTreeMap::new(),
            settings: Settings::default(),
        }
    }

    pub fn new(
        transport: Arc<dyn Transport>,
        resources: BTreeMap<String, ResourceConfig>,
    ) -> Result<Self> {
        Self::builder(transport).resources(resources).build()
    }

    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    pub fn resource_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.shared.types.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    pub fn config(&self, resource_type: &str) -> Result<&ResourceConfig> {
        Ok(&self.shared.slot(resource_type)?.config)
    }

    /// Current snapshot of a type's stores
    pub fn state(&self, resource_type: &str) -> Result<Arc<TypeState>> {
        self.shared.snapshot(resource_type)
    }

    /// Change notifications for a type's stores
    pub fn watch(&self, resource_type: &str) -> Result<watch::Receiver<Arc<TypeState>>> {
        Ok(self.shared.slot(resource_type)?.state.subscribe())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.bus.subscribe()
    }

    /// Hand an operation to the orchestrator; see [`saga::dispatch`]
    pub fn dispatch(&self, operation: Operation) -> Result<Arc<Operation>> {
        saga::dispatch(&self.shared, operation)
    }

    /// Clear a type's cache and index by hand
    pub fn invalidate(&self, resource_type: &str) -> Result<()> {
        self.shared.slot(resource_type)?;
        self.shared.invalidate(resource_type);
        Ok(())
    }

    /// Caller-side adapter: the value when ready, otherwise the placeholder, after
    /// dispatching the fetch a pending selection asks for
    pub fn select<T>(&self, selection: Selection<T>) -> T {
        match selection {
            Selection::Ready(value) | Selection::Failed(value) => value,
            Selection::Pending(miss) => {
                tracing::debug!("Miss: {}", miss.description);
                if let Err(e) = self.dispatch(miss.request) {
                    tracing::warn!("Cannot fetch {}: {}", miss.description, e);
                }
                miss.placeholder
            }
        }
    }

    /// Accessors and operations bound to one type
    pub fn resource(&self, resource_type: &str) -> Result<ResourceHandle<'_>> {
        self.shared.slot(resource_type)?;
        Ok(ResourceHandle {
            registry: self,
            resource_type: resource_type.to_string(),
        })
    }
}

/// One resource type's accessors and operations
pub struct ResourceHandle<'a> {
    registry: &'a Registry,
    resource_type: String,
}

impl ResourceHandle<'_> {
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn state(&self) -> Arc<TypeState> {
        // The type was checked when the handle was made.
        self.registry
            .state(&self.resource_type)
            .unwrap_or_else(|_| Arc::new(TypeState::new(&self.resource_type)))
    }

    pub fn get_one(&self, id: &str) -> Selection<Option<Arc<Resource>>> {
        selectors::get_one(&self.state(), id)
    }

    pub fn get_many(&self, filter: &Value) -> Selection<Vec<Arc<Resource>>> {
        selectors::get_many(&self.state(), filter)
    }

    pub fn get_all(&self) -> Selection<Vec<Arc<Resource>>> {
        selectors::get_all(&self.state())
    }

    pub fn get_by(&self, attribute: &str, value: &Value) -> Option<Arc<Resource>> {
        selectors::get_by(&self.state(), attribute, value)
    }

    /// Resources of this type linked from `resource`
    pub fn get_related(&self, resource: &Resource, relationship: &str) -> Selection<Vec<Arc<Resource>>> {
        selectors::get_related(&self.state(), resource, relationship)
    }

    pub fn get_related_one(
        &self,
        resource: &Resource,
        relationship: &str,
    ) -> Selection<Option<Arc<Resource>>> {
        selectors::get_related_one(&self.state(), resource, relationship)
    }

    pub fn process(&self, operation: &str, pid: &str) -> ProcessEntry {
        selectors::get_process(&self.state(), operation, pid)
    }

    pub fn fetch_collection(&self, filter: Value) -> Operation {
        Operation::fetch_collection(&self.resource_type, filter)
    }

    pub fn fetch_individual(&self, id: &str) -> Operation {
        Operation::fetch_individual(&self.resource_type, id)
    }

    pub fn create(&self, attributes: Value) -> Operation {
        Operation::create(&self.resource_type, attributes)
    }

    pub fn update(&self, resource: Value) -> Operation {
        Operation::update(&self.resource_type, resource)
    }

    pub fn destroy(&self, id: &str) -> Operation {
        Operation::destroy(&self.resource_type, id)
    }

    pub fn action(&self, name: &str, id: Option<&str>, arguments: Value) -> Operation {
        Operation::action(&self.resource_type, name, id, arguments)
    }

    /// `get_one`, retried until loaded or known failed
    pub async fn load_one(&self, id: &str) -> Result<Option<Arc<Resource>>> {
        let resource_type = self.resource_type.clone();
        let id = id.to_string();
        effects::diligent_select(self.registry, move |registry| {
            Ok(selectors::get_one(&*registry.state(&resource_type)?, &id))
        })
        .await
    }

    /// `get_many`, retried until loaded or known failed
    pub async fn load_many(&self, filter: &Value) -> Result<Vec<Arc<Resource>>> {
        let resource_type = self.resource_type.clone();
        let filter = filter.clone();
        effects::diligent_select(self.registry, move |registry| {
            Ok(selectors::get_many(&*registry.state(&resource_type)?, &filter))
        })
        .await
    }

    /// Dispatch and wait for the terminal event
    pub async fn run(&self, operation: Operation) -> Result<Value> {
        effects::run_to_completion(self.registry, operation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ActionConfig;
    use crate::transport::MemoryTransport;
    use serde_json::json;

    fn registry() -> Registry {
        Registry::builder(Arc::new(MemoryTransport::new()))
            .resource("posts", ResourceConfig::default().invalidates("comments"))
            .resource("comments", ResourceConfig::read_only())
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_registers_types() {
        let registry = registry();
        assert_eq!(registry.resource_types(), vec!["comments", "posts"]);
        assert!(registry.state("posts").unwrap().cache.is_empty());
        assert!(matches!(
            registry.state("users"),
            Err(Error::UnknownResourceType(_))
        ));
        assert!(registry.resource("users").is_err());
    }

    #[test]
    fn test_builder_rejects_shadowing_actions() {
        let result = Registry::builder(Arc::new(MemoryTransport::new()))
            .resource(
                "posts",
                ResourceConfig::default().with_action("create", ActionConfig::collection()),
            )
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalidate_clears_and_notifies() {
        let registry = registry();
        let mut changes = registry.watch("posts").unwrap();
        registry
            .shared
            .modify("posts", |state| state.cache.put(Resource::new("posts", "1")))
            .unwrap();
        assert!(changes.has_changed().unwrap());
        changes.mark_unchanged();

        let before = registry.state("posts").unwrap();
        registry.invalidate("posts").unwrap();
        assert!(registry.state("posts").unwrap().cache.is_empty());
        assert!(changes.has_changed().unwrap());
        // Earlier snapshots are untouched by later writes
        assert_eq!(before.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_select_dispatches_on_miss() {
        let registry = registry();
        let posts = registry.resource("posts").unwrap();
        let mut events = registry.subscribe();

        let value = registry.select(posts.get_many(&json!({"id": ["2"]})));
        assert!(value.is_empty());

        // The fetch reaches the worker, which fails to find the post upstream.
        loop {
            let event = events.recv().await.unwrap();
            if event.is_terminal() {
                break;
            }
        }
        assert!(posts.state().cache.is_errored("2"));
    }
}
