//! Process tracker
//!
//! Execution state of named operations, keyed by `(operation, pid)`.

use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessStatus {
    #[default]
    Unstarted,
    Running,
    Errored,
    Completed,
}

impl ProcessStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Errored | Self::Completed)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessEntry {
    pub status: ProcessStatus,
    /// Only present while `Completed`
    pub result: Option<Value>,
}

/// A status transition as reported by the orchestrator
#[derive(Debug, Clone)]
pub struct ProcessUpdate {
    pub operation: String,
    pub pid: String,
    pub status: ProcessStatus,
    pub result: Option<Value>,
    /// Set once a request has actually been accepted for execution
    pub initiated: bool,
}

impl ProcessUpdate {
    pub fn new(operation: &str, pid: &str, status: ProcessStatus) -> Self {
        Self {
            operation: operation.to_string(),
            pid: pid.to_string(),
            status,
            result: None,
            initiated: true,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn not_initiated(mut self) -> Self {
        self.initiated = false;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessTracker {
    entries: HashMap<(String, String), ProcessEntry>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a transition. Updates that were never initiated are ignored, so a
    /// request rejected before execution cannot clobber a running process.
    pub fn update(&mut self, update: ProcessUpdate) -> bool {
        if !update.initiated {
            return false;
        }

        let result = match update.status {
            ProcessStatus::Completed => update.result,
            _ => None,
        };
        self.entries.insert(
            (update.operation, update.pid),
            ProcessEntry {
                status: update.status,
                result,
            },
        );
        true
    }

    pub fn get(&self, operation: &str, pid: &str) -> ProcessEntry {
        self.entries
            .get(&(operation.to_string(), pid.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn status(&self, operation: &str, pid: &str) -> ProcessStatus {
        self.get(operation, pid).status
    }

    pub fn result(&self, operation: &str, pid: &str) -> Option<Value> {
        self.get(operation, pid).result
    }

    pub fn is_running(&self, operation: &str, pid: &str) -> bool {
        self.status(operation, pid) == ProcessStatus::Running
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
