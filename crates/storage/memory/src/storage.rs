use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use blobwatch_core::{BlobIdentity, BlobKind, ETag};
use blobwatch_storage::{
    BlobLookup, BlobProperties, BlobStorage, ContinuationToken, CreateOutcome, LeaseId,
    LeaseOutcome, ListResult, ListSegment, LoggingProperties, Metadata, StorageError,
};

#[derive(Debug, Clone, Copy)]
struct LeaseEntry {
    id: LeaseId,
    expires_at: Instant,
}

impl LeaseEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    kind: BlobKind,
    content: String,
    etag: ETag,
    last_modified: DateTime<Utc>,
    metadata: Metadata,
    lease: Option<LeaseEntry>,
}

impl StoredBlob {
    fn active_lease(&self) -> Option<LeaseId> {
        self.lease.filter(|l| !l.is_expired()).map(|l| l.id)
    }

    fn properties(&self, container: &str, name: &str) -> BlobProperties {
        BlobProperties {
            blob: BlobIdentity::new(container, name, self.kind),
            etag: self.etag.clone(),
            last_modified: self.last_modified,
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    containers: DashMap<String, BTreeMap<String, StoredBlob>>,
    etag_seq: AtomicU64,
    logging: Mutex<LoggingProperties>,
    emulator: bool,
}

/// In-memory [`BlobStorage`] backed by a [`DashMap`] of containers.
///
/// Blobs in a container are kept in name order so listings page
/// deterministically; the continuation token is the last name returned.
/// Lease expiry is lazy and measured on the tokio clock, so tests can drive
/// it with a paused runtime.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStorage {
    inner: Arc<Inner>,
}

impl MemoryBlobStorage {
    /// Create an empty storage account that supports write logging.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty storage account that behaves like a local emulator:
    /// request logging is not available.
    pub fn emulator() -> Self {
        Self {
            inner: Arc::new(Inner {
                emulator: true,
                ..Inner::default()
            }),
        }
    }

    fn next_etag(&self) -> ETag {
        let seq = self.inner.etag_seq.fetch_add(1, Ordering::Relaxed) + 1;
        ETag::new(format!("\"0x{seq:016X}\""))
    }

    pub fn create_container(&self, container: &str) {
        self.inner
            .containers
            .entry(container.to_owned())
            .or_default();
    }

    /// Remove a container and every blob in it. Returns whether it existed.
    pub fn delete_container(&self, container: &str) -> bool {
        self.inner.containers.remove(container).is_some()
    }

    /// Write a blob with the current time as its last-modified timestamp.
    pub fn put_blob(&self, blob: &BlobIdentity, content: &str) -> BlobProperties {
        self.write(blob, content, Metadata::new(), Utc::now())
    }

    /// Write a blob with an explicit last-modified timestamp.
    pub fn put_blob_at(
        &self,
        blob: &BlobIdentity,
        content: &str,
        last_modified: DateTime<Utc>,
    ) -> BlobProperties {
        self.write(blob, content, Metadata::new(), last_modified)
    }

    pub fn put_blob_with_metadata(
        &self,
        blob: &BlobIdentity,
        content: &str,
        metadata: Metadata,
    ) -> BlobProperties {
        self.write(blob, content, metadata, Utc::now())
    }

    /// Remove a blob. Returns whether it existed.
    pub fn delete_blob(&self, blob: &BlobIdentity) -> bool {
        self.inner
            .containers
            .get_mut(&blob.container)
            .is_some_and(|mut blobs| blobs.remove(&blob.name).is_some())
    }

    /// Number of blobs currently stored in `container`.
    pub fn blob_count(&self, container: &str) -> usize {
        self.inner
            .containers
            .get(container)
            .map_or(0, |blobs| blobs.len())
    }

    // Overwrites replace the blob entirely, dropping any lease.
    fn write(
        &self,
        blob: &BlobIdentity,
        content: &str,
        metadata: Metadata,
        last_modified: DateTime<Utc>,
    ) -> BlobProperties {
        let stored = StoredBlob {
            kind: blob.kind,
            content: content.to_owned(),
            etag: self.next_etag(),
            last_modified,
            metadata,
            lease: None,
        };
        let props = stored.properties(&blob.container, &blob.name);
        self.inner
            .containers
            .entry(blob.container.clone())
            .or_default()
            .insert(blob.name.clone(), stored);
        props
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn get_properties(&self, blob: &BlobIdentity) -> Result<BlobLookup, StorageError> {
        let found = self
            .inner
            .containers
            .get(&blob.container)
            .and_then(|blobs| {
                blobs
                    .get(&blob.name)
                    .map(|b| b.properties(&blob.container, &blob.name))
            });
        Ok(found.map_or(BlobLookup::NotFound, BlobLookup::Found))
    }

    async fn list_blobs(
        &self,
        container: &str,
        prefix: Option<&str>,
        max_results: usize,
        continuation: Option<&ContinuationToken>,
    ) -> Result<ListResult, StorageError> {
        let Some(blobs) = self.inner.containers.get(container) else {
            return Ok(ListResult::ContainerNotFound);
        };

        let start = continuation.map_or(Bound::Unbounded, |token| {
            Bound::Excluded(token.as_str().to_owned())
        });
        let page_size = max_results.max(1);

        let mut matching = blobs
            .range((start, Bound::Unbounded))
            .filter(|(name, _)| prefix.is_none_or(|p| name.starts_with(p)));

        let page: Vec<BlobProperties> = matching
            .by_ref()
            .take(page_size)
            .map(|(name, b)| b.properties(container, name))
            .collect();

        let continuation = match (matching.next(), page.last()) {
            (Some(_), Some(last)) => Some(ContinuationToken::new(last.blob.name.clone())),
            _ => None,
        };

        Ok(ListResult::Segment(ListSegment {
            blobs: page,
            continuation,
        }))
    }

    async fn read_text(&self, blob: &BlobIdentity) -> Result<Option<String>, StorageError> {
        Ok(self
            .inner
            .containers
            .get(&blob.container)
            .and_then(|blobs| blobs.get(&blob.name).map(|b| b.content.clone())))
    }

    async fn create_if_not_exists(
        &self,
        blob: &BlobIdentity,
        metadata: Metadata,
    ) -> Result<CreateOutcome, StorageError> {
        let mut blobs = self
            .inner
            .containers
            .entry(blob.container.clone())
            .or_default();

        if blobs.contains_key(&blob.name) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        blobs.insert(
            blob.name.clone(),
            StoredBlob {
                kind: blob.kind,
                content: String::new(),
                etag: self.next_etag(),
                last_modified: Utc::now(),
                metadata,
                lease: None,
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn set_metadata(
        &self,
        blob: &BlobIdentity,
        metadata: Metadata,
        lease: &LeaseId,
    ) -> Result<(), StorageError> {
        let mut blobs = self
            .inner
            .containers
            .get_mut(&blob.container)
            .ok_or_else(|| StorageError::NotFound(blob.path()))?;
        let stored = blobs
            .get_mut(&blob.name)
            .ok_or_else(|| StorageError::NotFound(blob.path()))?;

        if stored.active_lease() != Some(*lease) {
            return Err(StorageError::LeaseMismatch(blob.path()));
        }

        stored.metadata = metadata;
        stored.etag = self.next_etag();
        stored.last_modified = Utc::now();
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        blob: &BlobIdentity,
        duration: Duration,
    ) -> Result<LeaseOutcome, StorageError> {
        let Some(mut blobs) = self.inner.containers.get_mut(&blob.container) else {
            return Ok(LeaseOutcome::NotFound);
        };
        let Some(stored) = blobs.get_mut(&blob.name) else {
            return Ok(LeaseOutcome::NotFound);
        };

        if stored.active_lease().is_some() {
            return Ok(LeaseOutcome::AlreadyLeased);
        }

        let id = LeaseId::new();
        stored.lease = Some(LeaseEntry {
            id,
            expires_at: Instant::now() + duration,
        });
        Ok(LeaseOutcome::Acquired(id))
    }

    async fn release_lease(
        &self,
        blob: &BlobIdentity,
        lease: &LeaseId,
    ) -> Result<(), StorageError> {
        let Some(mut blobs) = self.inner.containers.get_mut(&blob.container) else {
            return Ok(());
        };
        let Some(stored) = blobs.get_mut(&blob.name) else {
            return Ok(());
        };

        match stored.active_lease() {
            Some(active) if active == *lease => {
                stored.lease = None;
                Ok(())
            }
            Some(_) => Err(StorageError::LeaseMismatch(blob.path())),
            None => Ok(()),
        }
    }

    fn supports_write_logging(&self) -> bool {
        !self.inner.emulator
    }

    async fn logging_properties(&self) -> Result<LoggingProperties, StorageError> {
        if self.inner.emulator {
            return Err(StorageError::Unsupported("request logging".into()));
        }
        Ok(*self.inner.logging.lock())
    }

    async fn set_logging_properties(
        &self,
        properties: LoggingProperties,
    ) -> Result<(), StorageError> {
        if self.inner.emulator {
            return Err(StorageError::Unsupported("request logging".into()));
        }
        *self.inner.logging.lock() = properties;
        Ok(())
    }
}
