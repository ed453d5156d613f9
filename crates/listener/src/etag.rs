use std::sync::Arc;

use async_trait::async_trait;

use blobwatch_core::{BlobIdentity, BlobVersion};
use blobwatch_storage::{BlobLookup, BlobStorage};

use crate::error::ListenerError;

/// Reads the current version of a blob.
///
/// An injected component rather than a shared global so each listener (and
/// each test) supplies its own.
#[async_trait]
pub trait ETagReader: Send + Sync {
    /// The blob's current version, with ETag and stored kind, or `None` if it
    /// no longer exists.
    async fn read_current(&self, blob: &BlobIdentity)
    -> Result<Option<BlobVersion>, ListenerError>;
}

/// [`ETagReader`] over a [`BlobStorage`].
pub struct StorageETagReader {
    storage: Arc<dyn BlobStorage>,
}

impl StorageETagReader {
    pub fn new(storage: Arc<dyn BlobStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ETagReader for StorageETagReader {
    async fn read_current(
        &self,
        blob: &BlobIdentity,
    ) -> Result<Option<BlobVersion>, ListenerError> {
        match self.storage.get_properties(blob).await? {
            BlobLookup::Found(props) => Ok(Some(props.version())),
            BlobLookup::NotFound => Ok(None),
        }
    }
}
