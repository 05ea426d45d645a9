//! Error types
//!
//! Everything an operation can terminate with. The "not loaded yet" signal of an
//! accessor is deliberately absent: that is [`crate::Selection::Pending`], not a
//! failure.

use std::sync::Arc;

/// Result alias used across the public API.
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal failure of a dispatched operation or a helper.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A process with the same `(operation, pid)` is already running.
    #[error("duplicate pid: {operation} is already running under pid {pid:?}")]
    DuplicatePid {
        /// Operation name (`create`, `destroy`, or a custom action name).
        operation: String,
        /// Correlation token that collided.
        pid: String,
    },

    /// The transport collaborator failed.
    #[error("transport error: {0}")]
    Transport(Arc<anyhow::Error>),

    /// Malformed request. These are defects in the caller, never cached or retried.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The resource type was never registered.
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    /// The resource type's configuration does not enable this operation.
    #[error("{operation} is not enabled for {resource_type}")]
    OperationDisabled {
        /// Resource type the operation targeted.
        resource_type: String,
        /// Operation name.
        operation: String,
    },

    /// An accessor kept missing after every retry.
    #[error("unable to resolve {description} in a reasonable number of attempts")]
    Unresolvable {
        /// Description carried by the last miss.
        description: String,
    },

    /// The event stream closed before the operation reached a terminal event.
    #[error("event stream closed before the operation finished")]
    TerminalTimeout,
}

impl Error {
    /// Build a protocol error from anything printable.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Wrap a transport failure.
    pub fn transport(error: anyhow::Error) -> Self {
        Self::Transport(Arc::new(error))
    }

    /// Whether this error is a caller defect rather than a runtime condition.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::UnknownResourceType(_) | Self::OperationDisabled { .. }
        )
    }
}
