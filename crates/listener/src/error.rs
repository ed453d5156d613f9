use thiserror::Error;

/// Errors that can occur while discovering, dispatching or replaying blobs.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// An error from the object storage collaborator.
    #[error("storage error: {0}")]
    Storage(#[from] blobwatch_storage::StorageError),

    /// An error from the durable queue.
    #[error("queue error: {0}")]
    Queue(#[from] blobwatch_queue::QueueError),

    /// A pattern or trigger message could not be parsed.
    #[error(transparent)]
    Core(#[from] blobwatch_core::CoreError),

    /// The caller broke the lifecycle contract (e.g. registering after
    /// start, starting twice, use after dispose).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The listener was misconfigured (e.g. missing required components).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ListenerError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retryable(),
            Self::Queue(e) => e.is_retryable(),
            Self::Core(_) | Self::InvalidOperation(_) | Self::Configuration(_) => false,
        }
    }
}
