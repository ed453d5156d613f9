use std::time::Duration;

use async_trait::async_trait;

use blobwatch_core::BlobIdentity;

use crate::error::StorageError;
use crate::types::{
    BlobLookup, ContinuationToken, CreateOutcome, LeaseId, LeaseOutcome, ListResult,
    LoggingProperties, Metadata,
};

/// Object storage operations needed to discover blobs and keep receipts.
///
/// Implementations must make [`create_if_not_exists`](Self::create_if_not_exists)
/// and [`try_acquire_lease`](Self::try_acquire_lease) atomic: they are the
/// only cross-process synchronization points.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Fetch the current properties of a blob.
    async fn get_properties(&self, blob: &BlobIdentity) -> Result<BlobLookup, StorageError>;

    /// List one page of blobs in `container`, ordered by name.
    ///
    /// `max_results` bounds the page size; a `None` continuation starts from
    /// the beginning.
    async fn list_blobs(
        &self,
        container: &str,
        prefix: Option<&str>,
        max_results: usize,
        continuation: Option<&ContinuationToken>,
    ) -> Result<ListResult, StorageError>;

    /// Read a blob's content as UTF-8 text. `None` if the blob does not exist.
    async fn read_text(&self, blob: &BlobIdentity) -> Result<Option<String>, StorageError>;

    /// Create an empty blob with the given metadata unless it already exists.
    /// The container is created if needed.
    async fn create_if_not_exists(
        &self,
        blob: &BlobIdentity,
        metadata: Metadata,
    ) -> Result<CreateOutcome, StorageError>;

    /// Replace a blob's metadata. The caller must hold the lease `lease`.
    async fn set_metadata(
        &self,
        blob: &BlobIdentity,
        metadata: Metadata,
        lease: &LeaseId,
    ) -> Result<(), StorageError>;

    /// Try to take an exclusive, time-bounded lease on a blob.
    async fn try_acquire_lease(
        &self,
        blob: &BlobIdentity,
        duration: Duration,
    ) -> Result<LeaseOutcome, StorageError>;

    /// Release a lease. Releasing an expired lease is not an error.
    async fn release_lease(&self, blob: &BlobIdentity, lease: &LeaseId)
    -> Result<(), StorageError>;

    /// Whether the service produces request logs that can be scanned for
    /// writes. Local emulators typically do not.
    fn supports_write_logging(&self) -> bool {
        true
    }

    async fn logging_properties(&self) -> Result<LoggingProperties, StorageError>;

    async fn set_logging_properties(
        &self,
        properties: LoggingProperties,
    ) -> Result<(), StorageError>;
}
