//! Dispatch receipts.
//!
//! A receipt is an empty blob in the receipt container, one per
//! `(host, function, ETag, blob)`. Because the ETag is part of the name, a
//! new write to the watched blob always maps to a fresh receipt. Completion
//! is recorded as metadata, written only while holding the receipt's lease.

use std::sync::Arc;
use std::time::Duration;

use blobwatch_core::{BlobIdentity, ETag, FunctionId, HostId};
use blobwatch_storage::{BlobLookup, BlobStorage, CreateOutcome, LeaseId, LeaseOutcome, Metadata};

use crate::error::ListenerError;

const RECEIPT_PREFIX: &str = "blobreceipts";
const IS_COMPLETED_METADATA: &str = "IsCompleted";

/// Location of a receipt object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptKey(BlobIdentity);

impl ReceiptKey {
    #[must_use]
    pub fn blob(&self) -> &BlobIdentity {
        &self.0
    }
}

/// Persisted dispatch state for one blob version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub is_completed: bool,
}

/// Owns the receipt objects in the receipt container and their leases.
///
/// Receipts live at
/// `blobreceipts/{host}/{function}/{etag}/{container}/{blob}`; a receipt
/// whose `IsCompleted` metadata is `true` means the version was enqueued.
pub struct ReceiptManager {
    storage: Arc<dyn BlobStorage>,
    container: String,
    lease_duration: Duration,
}

impl ReceiptManager {
    /// Receipts are stored in `container`; leases taken on them last
    /// `lease_duration`.
    pub fn new(
        storage: Arc<dyn BlobStorage>,
        container: impl Into<String>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            storage,
            container: container.into(),
            lease_duration,
        }
    }

    /// Build the receipt key for one blob version. Pure; no I/O.
    pub fn create_reference(
        &self,
        host_id: &HostId,
        function_id: &FunctionId,
        blob: &BlobIdentity,
        etag: &ETag,
    ) -> ReceiptKey {
        let name = format!(
            "{RECEIPT_PREFIX}/{host_id}/{function_id}/{}/{}/{}",
            etag.unquoted(),
            blob.container,
            blob.name
        );
        ReceiptKey(BlobIdentity::block(&self.container, name))
    }

    /// Read a receipt, or `None` if it has not been created.
    pub async fn try_read(&self, key: &ReceiptKey) -> Result<Option<Receipt>, ListenerError> {
        match self.storage.get_properties(key.blob()).await? {
            BlobLookup::Found(props) => Ok(Some(Receipt {
                is_completed: props
                    .metadata
                    .get(IS_COMPLETED_METADATA)
                    .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            })),
            BlobLookup::NotFound => Ok(None),
        }
    }

    /// Create an incomplete receipt. `false` if it already exists.
    pub async fn try_create(&self, key: &ReceiptKey) -> Result<bool, ListenerError> {
        let outcome = self
            .storage
            .create_if_not_exists(key.blob(), Metadata::new())
            .await?;
        Ok(outcome == CreateOutcome::Created)
    }

    /// Take the receipt's lease. `None` if someone else holds it.
    pub async fn try_acquire_lease(
        &self,
        key: &ReceiptKey,
    ) -> Result<Option<LeaseId>, ListenerError> {
        match self
            .storage
            .try_acquire_lease(key.blob(), self.lease_duration)
            .await?
        {
            LeaseOutcome::Acquired(lease) => Ok(Some(lease)),
            LeaseOutcome::AlreadyLeased | LeaseOutcome::NotFound => Ok(None),
        }
    }

    /// Record completion. Only valid while holding `lease`.
    pub async fn mark_completed(
        &self,
        key: &ReceiptKey,
        lease: &LeaseId,
    ) -> Result<(), ListenerError> {
        let metadata: Metadata = [(IS_COMPLETED_METADATA.to_owned(), "true".to_owned())]
            .into_iter()
            .collect();
        self.storage
            .set_metadata(key.blob(), metadata, lease)
            .await?;
        Ok(())
    }

    pub async fn release_lease(&self, key: &ReceiptKey, lease: &LeaseId) -> Result<(), ListenerError> {
        self.storage.release_lease(key.blob(), lease).await?;
        Ok(())
    }
}
