use thiserror::Error;

/// Errors from the object storage collaborator.
///
/// Absence and contention are reported through result enums such as
/// [`crate::BlobLookup`] and [`crate::LeaseOutcome`]; only genuine faults and
/// contract violations end up here.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("lease mismatch on {0}")]
    LeaseMismatch(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl StorageError {
    /// Whether the failure is transient and the operation may succeed if
    /// attempted again later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_) | Self::Backend(_))
    }
}
