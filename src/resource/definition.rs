//! Resource definitions
//!
//! Per-type wiring: which operations are enabled, which custom actions exist and
//! what a successful mutation invalidates. Definitions are plain serde data so they
//! load from the config file, with invalidation predicates attachable in code.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Names reserved for the built-in operations
pub const BUILTIN_OPERATIONS: &[&str] = &[
    "fetchCollection",
    "fetchIndividual",
    "create",
    "update",
    "destroy",
];

/// Whether a custom action targets one resource or the whole collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Individual,
    Collection,
}

/// Decides whether a successful action invalidates its stores
#[derive(Clone, Deserialize)]
#[serde(from = "bool")]
pub enum Invalidation {
    Always(bool),
    When(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl Invalidation {
    pub fn applies(&self, result: &Value) -> bool {
        match self {
            Self::Always(flag) => *flag,
            Self::When(predicate) => predicate(result),
        }
    }
}

impl Default for Invalidation {
    fn default() -> Self {
        Self::Always(true)
    }
}

impl From<bool> for Invalidation {
    fn from(flag: bool) -> Self {
        Self::Always(flag)
    }
}

impl fmt::Debug for Invalidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always(flag) => write!(f, "Always({})", flag),
            Self::When(_) => f.write_str("When(<predicate>)"),
        }
    }
}

// Predicates only exist in code; they persist as `true`.
impl Serialize for Invalidation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Always(flag) => serializer.serialize_bool(*flag),
            Self::When(_) => serializer.serialize_bool(true),
        }
    }
}

/// Custom action definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    pub kind: ActionKind,
    #[serde(default)]
    pub invalidation: Invalidation,
    #[serde(default)]
    pub invalidate_on_fail: bool,
}

impl ActionConfig {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            invalidation: Invalidation::default(),
            invalidate_on_fail: false,
        }
    }

    pub fn individual() -> Self {
        Self::new(ActionKind::Individual)
    }

    pub fn collection() -> Self {
        Self::new(ActionKind::Collection)
    }

    pub fn invalidating(mut self, flag: bool) -> Self {
        self.invalidation = Invalidation::Always(flag);
        self
    }

    /// Invalidate only when `predicate` holds on the action's result
    pub fn invalidate_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.invalidation = Invalidation::When(Arc::new(predicate));
        self
    }

    pub fn invalidate_on_fail(mut self, flag: bool) -> Self {
        self.invalidate_on_fail = flag;
        self
    }
}

fn enabled() -> bool {
    true
}

/// Resource type definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "enabled")]
    pub fetch_collection: bool,
    #[serde(default = "enabled")]
    pub fetch_individual: bool,
    #[serde(default = "enabled")]
    pub create: bool,
    #[serde(default = "enabled")]
    pub update: bool,
    #[serde(default = "enabled")]
    pub destroy: bool,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionConfig>,
    /// Other types cleared whenever this type is mutated
    #[serde(default)]
    pub invalidates: Vec<String>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            fetch_collection: true,
            fetch_individual: true,
            create: true,
            update: true,
            destroy: true,
            actions: BTreeMap::new(),
            invalidates: Vec::new(),
        }
    }
}

impl ResourceConfig {
    /// Fetches only, no mutations
    pub fn read_only() -> Self {
        Self {
            create: false,
            update: false,
            destroy: false,
            ..Self::default()
        }
    }

    pub fn with_action(mut self, name: &str, action: ActionConfig) -> Self {
        self.actions.insert(name.to_string(), action);
        self
    }

    pub fn invalidates(mut self, resource_type: &str) -> Self {
        self.invalidates.push(resource_type.to_string());
        self
    }

    pub fn action(&self, name: &str) -> Option<&ActionConfig> {
        self.actions.get(name)
    }

    /// Reject definitions that would shadow built-in operations
    pub fn validate(&self, resource_type: &str) -> Result<()> {
        if let Some(name) = self
            .actions
            .keys()
            .find(|name| BUILTIN_OPERATIONS.contains(&name.as_str()))
        {
            return Err(Error::protocol(format!(
                "{}: custom action {} shadows a built-in operation",
                resource_type, name
            )));
        }
        if let Some(name) = self.actions.keys().find(|name| name.is_empty()) {
            return Err(Error::protocol(format!(
                "{}: custom action name {:?} is empty",
                resource_type, name
            )));
        }
        Ok(())
    }
}
