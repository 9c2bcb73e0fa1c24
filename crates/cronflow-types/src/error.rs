use thiserror::Error;

/// Failure reported by a business step callable.
///
/// This is the error classification contract between application code and
/// the workflow runner: `Transient` failures consume the workflow retry
/// budget, `Permanent` failures skip remaining retries and fail the
/// instance immediately.
#[derive(Debug, Clone, Error)]
pub enum StepFailure {
    /// Recoverable failure (network timeout, upstream 5xx, lock contention).
    #[error("transient step failure: {0}")]
    Transient(String),

    /// Non-recoverable failure (invalid input, missing resource).
    #[error("permanent step failure: {0}")]
    Permanent(String),
}

impl StepFailure {
    /// Build a transient failure from any displayable error.
    pub fn transient(e: impl std::fmt::Display) -> Self {
        StepFailure::Transient(e.to_string())
    }

    /// Build a permanent failure from any displayable error.
    pub fn permanent(e: impl std::fmt::Display) -> Self {
        StepFailure::Permanent(e.to_string())
    }

    /// Whether this failure should skip the remaining retry budget.
    pub fn is_permanent(&self) -> bool {
        matches!(self, StepFailure::Permanent(_))
    }
}

/// Errors from repository operations (used by trait definitions in cronflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// The store is briefly locked by another writer; safe to retry.
    #[error("store busy: {0}")]
    Busy(String),
}

impl RepositoryError {
    /// Whether the operation can be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::Busy(_))
    }
}
