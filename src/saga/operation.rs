//! Operation-start requests
//!
//! An [`Operation`] is what accessors embed in a miss and what callers dispatch into
//! the orchestrator. Its kind is an enum plus, for custom actions, the configured
//! action name; camel-cased action types only appear at the logging boundary.

use crate::store::{id_list, QueryKey};
use heck::{ToLowerCamelCase, ToUpperCamelCase};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Correlation token used when the caller does not supply one
pub const DEFAULT_PID: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    FetchCollection,
    FetchIndividual,
    Create,
    Update,
    Destroy,
    /// Custom action, by configured name
    Action(String),
}

impl OperationKind {
    /// Name used for process tracking and configuration lookups
    pub fn name(&self) -> &str {
        match self {
            Self::FetchCollection => "fetchCollection",
            Self::FetchIndividual => "fetchIndividual",
            Self::Create => "create",
            Self::Update => "update",
            Self::Destroy => "destroy",
            Self::Action(name) => name,
        }
    }

    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::FetchCollection | Self::FetchIndividual)
    }
}

#[derive(Debug, Clone)]
pub struct Meta {
    pub pid: Option<String>,
    /// Bypass the already-known and already-fetching guards
    pub ignore_cache: bool,
    /// Identity of this dispatch; events refer back to it
    pub invocation: Uuid,
    /// Set once the orchestrator has accepted the operation for execution
    pub initiated: bool,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            pid: None,
            ignore_cache: false,
            invocation: Uuid::new_v4(),
            initiated: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub resource_type: String,
    pub kind: OperationKind,
    /// Filters, id, attributes or action arguments, depending on the kind
    pub payload: Value,
    pub meta: Meta,
}

impl Operation {
    pub fn new(resource_type: &str, kind: OperationKind, payload: Value) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            kind,
            payload,
            meta: Meta::default(),
        }
    }

    pub fn fetch_collection(resource_type: &str, filter: Value) -> Self {
        Self::new(resource_type, OperationKind::FetchCollection, filter)
    }

    pub fn fetch_individual(resource_type: &str, id: &str) -> Self {
        Self::new(resource_type, OperationKind::FetchIndividual, json!({ "id": id }))
    }

    /// `attributes` is the unpacked shape without an id
    pub fn create(resource_type: &str, attributes: Value) -> Self {
        Self::new(resource_type, OperationKind::Create, attributes)
    }

    /// `resource` is the unpacked shape and must carry its id
    pub fn update(resource_type: &str, resource: Value) -> Self {
        Self::new(resource_type, OperationKind::Update, resource)
    }

    pub fn destroy(resource_type: &str, id: &str) -> Self {
        Self::new(resource_type, OperationKind::Destroy, json!({ "id": id }))
    }

    pub fn action(resource_type: &str, name: &str, id: Option<&str>, arguments: Value) -> Self {
        let mut payload = Map::new();
        if let Some(id) = id {
            payload.insert("id".into(), Value::String(id.to_string()));
        }
        payload.insert("arguments".into(), arguments);
        Self::new(
            resource_type,
            OperationKind::Action(name.to_string()),
            Value::Object(payload),
        )
    }

    pub fn with_pid(mut self, pid: &str) -> Self {
        self.meta.pid = Some(pid.to_string());
        self
    }

    pub fn ignore_cache(mut self) -> Self {
        self.meta.ignore_cache = true;
        self
    }

    pub(crate) fn initiated(&self) -> Self {
        let mut op = self.clone();
        op.meta.initiated = true;
        op
    }

    pub fn pid(&self) -> &str {
        self.meta.pid.as_deref().unwrap_or(DEFAULT_PID)
    }

    /// `payload.id`, accepting numeric ids
    pub fn id(&self) -> Option<String> {
        match self.payload.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Filter descriptor of a collection fetch; `null` means no filter
    pub fn filter(&self) -> Value {
        match &self.payload {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        }
    }

    pub fn arguments(&self) -> Value {
        self.payload.get("arguments").cloned().unwrap_or(Value::Null)
    }

    /// Camel-cased action type, e.g. `fetchCollectionBlogPosts`
    pub fn action_type(&self) -> String {
        format!(
            "{}{}",
            self.kind.name().to_lower_camel_case(),
            self.resource_type.to_upper_camel_case()
        )
    }

    /// Keys this fetch occupies in the type's in-flight set
    pub fn in_flight_keys(&self) -> Vec<String> {
        match self.kind {
            OperationKind::FetchCollection => {
                let filter = self.filter();
                let mut keys = vec![format!("query:{}", QueryKey::new(&filter))];
                if let Some(ids) = id_list(&filter) {
                    keys.extend(ids.iter().map(|id| format!("id:{}", id)));
                }
                keys
            }
            OperationKind::FetchIndividual => {
                self.id().map(|id| vec![format!("id:{}", id)]).unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_naming() {
        assert_eq!(
            Operation::fetch_collection("blog-posts", json!({})).action_type(),
            "fetchCollectionBlogPosts"
        );
        assert_eq!(
            Operation::action("posts", "publish_now", Some("1"), Value::Null).action_type(),
            "publishNowPosts"
        );
    }

    #[test]
    fn test_pid_defaults() {
        let op = Operation::destroy("posts", "1");
        assert_eq!(op.pid(), DEFAULT_PID);
        assert_eq!(op.with_pid("tab-2").pid(), "tab-2");
    }

    #[test]
    fn test_invocations_are_unique() {
        let a = Operation::fetch_individual("posts", "1");
        let b = Operation::fetch_individual("posts", "1");
        assert_ne!(a.meta.invocation, b.meta.invocation);
        assert_eq!(a.clone().meta.invocation, a.meta.invocation);
    }

    #[test]
    fn test_in_flight_keys() {
        let op = Operation::fetch_collection("posts", json!({"id": ["2", "4"]}));
        assert_eq!(
            op.in_flight_keys(),
            vec![r#"query:{"id":["2","4"]}"#, "id:2", "id:4"]
        );
        assert_eq!(Operation::fetch_individual("posts", "9").in_flight_keys(), vec!["id:9"]);
        assert!(Operation::destroy("posts", "9").in_flight_keys().is_empty());
    }

    #[test]
    fn test_action_payload() {
        let op = Operation::action("posts", "publish", Some("3"), json!({"at": "now"}));
        assert_eq!(op.id().as_deref(), Some("3"));
        assert_eq!(op.arguments(), json!({"at": "now"}));

        let op = Operation::action("posts", "archiveAll", None, Value::Null);
        assert_eq!(op.id(), None);
    }

    #[test]
    fn test_null_filter_is_empty_object() {
        let op = Operation::fetch_collection("posts", Value::Null);
        assert_eq!(op.filter(), json!({}));
    }
}
