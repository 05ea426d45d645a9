//! rescache
//!
//! Client-side cache and index for remote, relational JSON APIs. Accessors read
//! synchronously from per-type stores; when data is missing they describe the fetch
//! that would load it, and the orchestrator runs that fetch through per-operation
//! queues and writes the result back.

pub mod config;
pub mod effects;
pub mod error;
pub mod registry;
pub mod resource;
pub mod saga;
pub mod selectors;
pub mod store;
pub mod transport;

pub use effects::{diligent_select, run_to_completion};
pub use error::{Error, Result};
pub use registry::{Registry, RegistryBuilder, ResourceHandle, Settings};
pub use resource::{ActionConfig, ActionKind, Invalidation, Resource, ResourceConfig};
pub use saga::{Event, Operation, OperationKind, SkipReason, DEFAULT_PID};
pub use selectors::{Miss, Selection, Unresolved};
pub use store::{ProcessEntry, ProcessStatus, TypeState};
pub use transport::{HttpTransport, MemoryTransport, Transport};
