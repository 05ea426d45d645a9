//! Wire shapes and the pack/unpack boundary.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Keys that stay at the top level when packing; everything else is an attribute.
pub const RESERVED_KEYS: &[&str] = &["id", "type", "relationships"];

/// Reference to another resource: `{type, id}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(resource_type: &str, id: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }
}

/// Relationship linkage: to-many, to-one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Linkage {
    Many(Vec<ResourceRef>),
    One(ResourceRef),
}

/// A named relationship. `data: null` means an empty to-one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub data: Option<Linkage>,
}

impl Relationship {
    pub fn to_one(target: ResourceRef) -> Self {
        Self {
            data: Some(Linkage::One(target)),
        }
    }

    pub fn to_many(targets: Vec<ResourceRef>) -> Self {
        Self {
            data: Some(Linkage::Many(targets)),
        }
    }

    /// All linked references, in declaration order
    pub fn refs(&self) -> Vec<&ResourceRef> {
        match &self.data {
            None => Vec::new(),
            Some(Linkage::One(r)) => vec![r],
            Some(Linkage::Many(refs)) => refs.iter().collect(),
        }
    }
}

/// A resource as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResource {
    /// Absent only in create request bodies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, Relationship>,
}

/// A resource unpacked for in-memory use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub relationships: BTreeMap<String, Relationship>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Resource {
    pub fn new(resource_type: &str, id: &str) -> Self {
        Self {
            id: id.to_string(),
            resource_type: resource_type.to_string(),
            relationships: BTreeMap::new(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn with_relationship(mut self, name: &str, relationship: Relationship) -> Self {
        self.relationships.insert(name.to_string(), relationship);
        self
    }

    /// Read a field the way the unpacked shape exposes it (`id` and `type` included)
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "type" => Some(Value::String(self.resource_type.clone())),
            _ => self.attributes.get(name).cloned(),
        }
    }

    /// Ids linked through `relationship` that point at `target_type`
    pub fn related_ids(&self, relationship: &str, target_type: &str) -> Vec<String> {
        self.relationships
            .get(relationship)
            .map(|rel| {
                rel.refs()
                    .into_iter()
                    .filter(|r| r.resource_type == target_type)
                    .map(|r| r.id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Inverse of [`unpack`]
    pub fn to_wire(&self) -> WireResource {
        WireResource {
            id: Some(self.id.clone()),
            resource_type: self.resource_type.clone(),
            attributes: self.attributes.clone(),
            relationships: self.relationships.clone(),
        }
    }
}

/// Unpack a wire resource. Responses must carry ids.
pub fn unpack(wire: WireResource) -> Result<Resource> {
    let Some(id) = wire.id else {
        return Err(Error::protocol(format!(
            "response resource of type {} has no id",
            wire.resource_type
        )));
    };

    Ok(Resource {
        id,
        resource_type: wire.resource_type,
        relationships: wire.relationships,
        attributes: wire.attributes,
    })
}

/// Pack an unpacked object for a create/update body.
///
/// Every key outside [`RESERVED_KEYS`] moves into `attributes`. Numeric ids are
/// accepted and stringified.
pub fn pack(resource_type: &str, value: &Value) -> Result<WireResource> {
    let Value::Object(map) = value else {
        return Err(Error::protocol(format!(
            "{} payload must be an object, got {}",
            resource_type, value
        )));
    };

    let id = match map.get("id") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => {
            return Err(Error::protocol(format!("invalid id in payload: {}", other)));
        }
    };

    if let Some(declared) = map.get("type").and_then(|v| v.as_str()) {
        if declared != resource_type {
            return Err(Error::protocol(format!(
                "payload type {} does not match {}",
                declared, resource_type
            )));
        }
    }

    let relationships = match map.get("relationships") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| Error::protocol(format!("invalid relationships: {}", e)))?,
    };

    let attributes = map
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(WireResource {
        id,
        resource_type: resource_type.to_string(),
        attributes,
        relationships,
    })
}

/// Primary data of a response document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primary {
    Many(Vec<WireResource>),
    One(Box<WireResource>),
}

/// A response document: primary data plus resources included per type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub data: Option<Primary>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub included: BTreeMap<String, Vec<WireResource>>,
}

impl Document {
    pub fn one(resource: WireResource) -> Self {
        Self {
            data: Some(Primary::One(Box::new(resource))),
            included: BTreeMap::new(),
        }
    }

    pub fn many(resources: Vec<WireResource>) -> Self {
        Self {
            data: Some(Primary::Many(resources)),
            included: BTreeMap::new(),
        }
    }

    pub fn with_included(mut self, resource_type: &str, resources: Vec<WireResource>) -> Self {
        self.included
            .entry(resource_type.to_string())
            .or_default()
            .extend(resources);
        self
    }

    /// Unpack primary data, preserving response order
    pub fn primary(&self) -> Result<Vec<Resource>> {
        match &self.data {
            None => Ok(Vec::new()),
            Some(Primary::One(wire)) => Ok(vec![unpack(wire.as_ref().clone())?]),
            Some(Primary::Many(wires)) => wires.iter().cloned().map(unpack).collect(),
        }
    }

    /// Unpack included resources grouped by type
    pub fn included(&self) -> Result<BTreeMap<String, Vec<Resource>>> {
        self.included
            .iter()
            .map(|(resource_type, wires)| {
                let unpacked = wires.iter().cloned().map(unpack).collect::<Result<Vec<_>>>()?;
                Ok((resource_type.clone(), unpacked))
            })
            .collect()
    }
}
