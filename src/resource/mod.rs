//! Resource model
//!
//! Resources travel in two shapes. On the wire a resource is
//! `{ id, type, attributes: {..}, relationships: {name: {data: ref|[ref]|null}} }`.
//! In memory it is unpacked to `{ ...attributes, id, type, relationships }` so
//! callers read fields directly.
//!
//! # Architecture
//!
//! - [`wire`] - Wire shapes, response documents and pack/unpack
//! - [`definition`] - Per-type configuration consumed by the registry
//!
//! # Example
//!
//! ```ignore
//! use rescache::resource::{pack, Resource};
//! use serde_json::json;
//!
//! let wire = pack("posts", &json!({ "title": "hello" }))?;
//! assert_eq!(wire.attributes["title"], "hello");
//! ```

mod definition;
mod wire;

pub use definition::*;
pub use wire::*;
