//! Transport collaborator
//!
//! The orchestrator never speaks HTTP itself; it calls a [`Transport`]. The crate
//! ships two implementations:
//!
//! - [`http`] - JSON over HTTP with reqwest
//! - [`memory`] - in-process server for tests and demos
//!
//! Transports report failures as opaque `anyhow` errors and never retry.

pub mod http;
pub mod memory;

pub use http::{format_transport_error, HttpTransport};
pub use memory::MemoryTransport;

use crate::resource::{Document, WireResource};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait Transport: Send + Sync {
    /// List resources matching a canonical filter descriptor
    async fn fetch_collection(&self, resource_type: &str, filter: &Value) -> Result<Document>;

    async fn fetch_individual(&self, resource_type: &str, id: &str) -> Result<Document>;

    /// `resource.id` is always `None`
    async fn create(&self, resource_type: &str, resource: &WireResource) -> Result<Document>;

    async fn update(&self, resource_type: &str, id: &str, resource: &WireResource)
        -> Result<Document>;

    async fn destroy(&self, resource_type: &str, id: &str) -> Result<()>;

    /// Custom action; `id` is set for individual actions only
    async fn action(
        &self,
        resource_type: &str,
        action: &str,
        id: Option<&str>,
        arguments: &Value,
    ) -> Result<Value>;
}
