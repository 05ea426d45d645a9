//! In-memory transport
//!
//! A small resource server living in the process. Responses can be held back to
//! exercise in-flight behaviour, and types or ids can be made to fail.

use super::Transport;
use crate::resource::{Document, Resource, WireResource};
use crate::store::id_list;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Default)]
struct MemoryState {
    resources: BTreeMap<String, BTreeMap<String, WireResource>>,
    included: BTreeMap<String, BTreeMap<String, Vec<WireResource>>>,
    action_results: HashMap<(String, String), Value>,
    failing: HashSet<String>,
    latency: Duration,
    calls: Vec<String>,
    next_id: u64,
}

pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    held: watch::Sender<bool>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (held, _) = watch::channel(false);
        Self {
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..MemoryState::default()
            }),
            held,
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    /// Store a resource server-side
    pub fn seed(&self, resource: Resource) {
        self.with_state(|state| {
            state
                .resources
                .entry(resource.resource_type.clone())
                .or_default()
                .insert(resource.id.clone(), resource.to_wire());
        });
    }

    /// Attach `resources` to every collection response for `primary_type`
    pub fn include(&self, primary_type: &str, resources: Vec<Resource>) {
        self.with_state(|state| {
            let slot = state.included.entry(primary_type.to_string()).or_default();
            for resource in resources {
                slot.entry(resource.resource_type.clone())
                    .or_default()
                    .push(resource.to_wire());
            }
        });
    }

    /// Result returned by a custom action
    pub fn set_action_result(&self, resource_type: &str, action: &str, result: Value) {
        self.with_state(|state| {
            state
                .action_results
                .insert((resource_type.to_string(), action.to_string()), result);
        });
    }

    /// Make every request touching `resource_type` fail
    pub fn fail(&self, resource_type: &str) {
        self.with_state(|state| state.failing.insert(resource_type.to_string()));
    }

    pub fn recover(&self, resource_type: &str) {
        self.with_state(|state| state.failing.remove(resource_type));
    }

    /// Delay every response by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.with_state(|state| state.latency = latency);
    }

    /// Hold every response until [`MemoryTransport::release`]
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// Requests served so far, e.g. `GET posts {"id":["2"]}`
    pub fn calls(&self) -> Vec<String> {
        self.with_state(|state| state.calls.clone())
    }

    pub fn call_count(&self) -> usize {
        self.with_state(|state| state.calls.len())
    }

    pub fn stored(&self, resource_type: &str, id: &str) -> Option<WireResource> {
        self.with_state(|state| {
            state
                .resources
                .get(resource_type)
                .and_then(|resources| resources.get(id))
                .cloned()
        })
    }

    async fn begin(&self, call: String, resource_type: &str) -> Result<()> {
        self.with_state(|state| state.calls.push(call));

        let mut held = self.held.subscribe();
        let released = held.wait_for(|held| !*held).await.is_ok();
        if !released {
            return Err(anyhow!("transport shut down"));
        }

        let latency = self.with_state(|state| state.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.with_state(|state| state.failing.contains(resource_type)) {
            return Err(anyhow!("API request failed: 503 Service Unavailable"));
        }
        Ok(())
    }

    fn not_found(resource_type: &str, id: &str) -> anyhow::Error {
        anyhow!("API request failed: 404 Not Found ({} {})", resource_type, id)
    }
}

fn matches_filter(resource: &WireResource, filter: &Value) -> bool {
    let Some(map) = filter.as_object() else {
        return true;
    };
    map.iter().all(|(key, expected)| match expected {
        Value::Object(_) | Value::Array(_) => true,
        _ => resource.attributes.get(key) == Some(expected),
    })
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch_collection(&self, resource_type: &str, filter: &Value) -> Result<Document> {
        self.begin(format!("GET {} {}", resource_type, filter), resource_type)
            .await?;

        self.with_state(|state| {
            let empty = BTreeMap::new();
            let stored = state.resources.get(resource_type).unwrap_or(&empty);

            let primary: Vec<WireResource> = match id_list(filter) {
                Some(ids) => ids.iter().filter_map(|id| stored.get(id).cloned()).collect(),
                None => stored
                    .values()
                    .filter(|resource| matches_filter(resource, filter))
                    .cloned()
                    .collect(),
            };

            let mut document = Document::many(primary);
            if let Some(included) = state.included.get(resource_type) {
                for (included_type, resources) in included {
                    document = document.with_included(included_type, resources.clone());
                }
            }
            Ok(document)
        })
    }

    async fn fetch_individual(&self, resource_type: &str, id: &str) -> Result<Document> {
        self.begin(format!("GET {}/{}", resource_type, id), resource_type)
            .await?;

        self.with_state(|state| {
            state
                .resources
                .get(resource_type)
                .and_then(|resources| resources.get(id))
                .cloned()
                .map(Document::one)
                .ok_or_else(|| Self::not_found(resource_type, id))
        })
    }

    async fn create(&self, resource_type: &str, resource: &WireResource) -> Result<Document> {
        self.begin(format!("POST {}", resource_type), resource_type)
            .await?;

        self.with_state(|state| {
            let id = state.next_id.to_string();
            state.next_id += 1;

            let mut created = resource.clone();
            created.id = Some(id.clone());
            state
                .resources
                .entry(resource_type.to_string())
                .or_default()
                .insert(id, created.clone());
            Ok(Document::one(created))
        })
    }

    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        resource: &WireResource,
    ) -> Result<Document> {
        self.begin(format!("PATCH {}/{}", resource_type, id), resource_type)
            .await?;

        self.with_state(|state| {
            let stored = state
                .resources
                .get_mut(resource_type)
                .and_then(|resources| resources.get_mut(id))
                .ok_or_else(|| Self::not_found(resource_type, id))?;

            stored.attributes.extend(resource.attributes.clone());
            stored.relationships.extend(resource.relationships.clone());
            Ok(Document::one(stored.clone()))
        })
    }

    async fn destroy(&self, resource_type: &str, id: &str) -> Result<()> {
        self.begin(format!("DELETE {}/{}", resource_type, id), resource_type)
            .await?;

        self.with_state(|state| {
            state
                .resources
                .get_mut(resource_type)
                .and_then(|resources| resources.remove(id))
                .map(|_| ())
                .ok_or_else(|| Self::not_found(resource_type, id))
        })
    }

    async fn action(
        &self,
        resource_type: &str,
        action: &str,
        id: Option<&str>,
        arguments: &Value,
    ) -> Result<Value> {
        let target = match id {
            Some(id) => format!("{}/{}", resource_type, id),
            None => resource_type.to_string(),
        };
        self.begin(format!("POST {}/{} {}", target, action, arguments), resource_type)
            .await?;

        Ok(self.with_state(|state| {
            state
                .action_results
                .get(&(resource_type.to_string(), action.to_string()))
                .cloned()
                .unwrap_or_else(|| json!({ "ok": true }))
        }))
    }
}
