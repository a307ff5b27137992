//! Error types and result aliases for hookwire.
//!
//! These are the errors surfaced by control-plane collaborators and by the
//! shared primitives. The reconciliation engine wraps them with per-unit
//! context (bucket, target) before reporting.

use std::fmt;

/// The result type used throughout hookwire.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in hookwire primitives and control-plane calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested remote resource does not exist.
    ///
    /// Policy lookups that end here are normalized to an empty statement set
    /// by the remote-state reader; everywhere else this is a real failure.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided (bad namespace, bad config value, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A control-plane request failed.
    #[error("control plane error: {message}")]
    ControlPlane {
        /// Description of the failed request.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new control-plane error with the given message.
    #[must_use]
    pub fn control_plane(message: impl Into<String>) -> Self {
        Self::ControlPlane {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new control-plane error with a source cause.
    #[must_use]
    pub fn control_plane_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ControlPlane {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a not-found error naming the resource kind and identifier.
    #[must_use]
    pub fn not_found(resource_type: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound(format!("{resource_type} {id}"))
    }

    /// Returns true if this error reports a missing remote resource.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            message: value.to_string(),
        }
    }
}
