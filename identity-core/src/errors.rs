//! Error types for identity reconciliation
//!
//! Every failure of a reconciliation request is one of three kinds: the
//! caller sent nothing to reconcile, the contact store could not be used, or
//! the stored clusters violate their own invariants.

use thiserror::Error;

/// Main error type for the reconciliation core
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Neither an email nor a phone number was supplied
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The contact store could not be reached or the transaction did not commit
    #[error("Contact repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// Stored records break the one-primary-per-cluster invariants
    #[error("Inconsistent cluster: {0}")]
    InconsistentCluster(String),
}

impl ReconcileError {
    pub(crate) fn unavailable(err: anyhow::Error) -> Self {
        // `{:#}` keeps the context chain added by the backends
        Self::RepositoryUnavailable(format!("{err:#}"))
    }

    pub(crate) fn inconsistent(message: impl Into<String>) -> Self {
        Self::InconsistentCluster(message.into())
    }

    /// Whether the failure was caused by the caller rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}

/// Result type alias for reconciliation operations
pub type Result<T> = std::result::Result<T, ReconcileError>;
