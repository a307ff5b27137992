//! Error types for reconciliation runs.

use thiserror::Error;

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Errors that can occur while planning or applying a convergence pass.
///
/// Fingerprinting and diffing never fail; everything here originates at the
/// declared-configuration boundary or in a remote call.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A target's address could not be resolved.
    #[error("target '{target}' is not deployed")]
    NotDeployed {
        /// The unresolved logical target.
        target: String,
    },

    /// The declared configuration is malformed.
    #[error("invalid declaration: {message}")]
    InvalidDeclaration {
        /// Description of the problem.
        message: String,
    },

    /// A remote read or write failed for one unit of work.
    #[error("remote call failed for {unit}: {source}")]
    Remote {
        /// Bucket or target the call was made for.
        unit: String,
        /// The control-plane error.
        #[source]
        source: hookwire_core::Error,
    },

    /// A computed plan would touch an entry it cannot prove is owned.
    #[error("invariant violation on bucket '{bucket}': {message}")]
    InvariantViolation {
        /// Bucket whose plan was aborted.
        bucket: String,
        /// Description of the violation.
        message: String,
    },

    /// The run was cancelled before this unit started.
    #[error("run cancelled")]
    Cancelled,

    /// A shared primitive failed.
    #[error(transparent)]
    Core(#[from] hookwire_core::Error),
}

impl ReconcileError {
    /// Wraps a control-plane error with the unit it was issued for.
    #[must_use]
    pub fn remote(unit: impl Into<String>, source: hookwire_core::Error) -> Self {
        Self::Remote {
            unit: unit.into(),
            source,
        }
    }
}
