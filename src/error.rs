//! Error types for ruleforge.
//!
//! All errors are strongly typed using thiserror. This enables pattern
//! matching on specific error conditions and provides clear error messages.
//! The engine performs no I/O, so there is no transient/permanent split and
//! no retry policy.

use thiserror::Error;

use crate::network::{AlphaId, NodeId};

/// Errors raised while constructing a rulebase.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A child link references a node that does not exist.
    #[error("Unknown node: {0:?}")]
    UnknownNode(NodeId),

    /// A link references an alpha node that does not exist.
    #[error("Unknown alpha node: {0:?}")]
    UnknownAlpha(AlphaId),

    /// A query name was registered twice.
    #[error("Duplicate query name: {name}")]
    DuplicateQuery {
        /// The offending name.
        name: String,
    },

    /// A terminal node was linked as a parent.
    #[error("Node {node:?} ({kind}) cannot have children")]
    TerminalParent {
        /// The offending node.
        node: NodeId,
        /// Its kind, for the message.
        kind: &'static str,
    },

    /// A condition helper was given an invalid configuration.
    #[error("Invalid condition: {reason}")]
    InvalidCondition {
        /// Why the condition was rejected.
        reason: String,
    },
}

/// Errors raised by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// `query` was called with an unregistered name.
    #[error("Unknown query: {name}")]
    UnknownQuery {
        /// The name that was not registered.
        name: String,
    },

    /// `query` was called without binding one of the query's parameters.
    #[error("Query '{query}' is missing parameter '{parameter}'")]
    MissingParameter {
        /// The query name.
        query: String,
        /// The unbound parameter key.
        parameter: String,
    },

    /// A rule's RHS returned an error during `fire_rules`.
    ///
    /// The in-flight session should be discarded; memory is left in
    /// whatever partial state the transient received.
    #[error("RHS of rule '{production}' failed: {message}")]
    RhsFailure {
        /// The production whose RHS failed.
        production: String,
        /// The underlying error, rendered.
        message: String,
    },
}

/// Errors raised by event stream subscriptions.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The listener side of the stream has been dropped.
    #[error("Event stream disconnected")]
    Disconnected,

    /// No event arrived within the timeout.
    #[error("Event stream receive timed out after {duration_ms}ms")]
    Timeout {
        /// Duration waited.
        duration_ms: u64,
    },
}

/// Top-level error type for ruleforge.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// Rulebase construction failure.
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Session operation failure.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Event stream failure.
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Internal invariant violation.
    #[error("Internal error: {message}")]
    Internal {
        /// Error description.
        message: String,
    },
}

impl ForgeError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a build error.
    #[must_use]
    pub const fn is_build(&self) -> bool {
        matches!(self, Self::Build(_))
    }

    /// Returns true if this is a session error.
    #[must_use]
    pub const fn is_session(&self) -> bool {
        matches!(self, Self::Session(_))
    }

    /// Returns true if this is a stream error.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

/// Result type alias for ruleforge operations.
pub type ForgeResult<T> = Result<T, ForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_query_display() {
        let err = SessionError::UnknownQuery {
            name: "adults".to_string(),
        };
        assert!(err.to_string().contains("adults"));
        assert!(err.to_string().contains("Unknown query"));
    }

    #[test]
    fn test_missing_parameter_display() {
        let err = SessionError::MissingParameter {
            query: "total".to_string(),
            parameter: "?customer".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("total"));
        assert!(msg.contains("?customer"));
    }

    #[test]
    fn test_forge_error_from_session() {
        let err: ForgeError = SessionError::UnknownQuery {
            name: "q".to_string(),
        }
        .into();
        assert!(err.is_session());
        assert!(!err.is_build());
    }

    #[test]
    fn test_forge_error_internal() {
        let err = ForgeError::internal("agenda out of sync");
        assert!(err.to_string().contains("agenda out of sync"));
    }
}
