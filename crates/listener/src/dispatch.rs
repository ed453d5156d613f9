//! Exactly-once conversion of a discovered blob version into a trigger
//! message.
//!
//! Per blob version the dispatcher:
//! 1. filters on the function's path pattern,
//! 2. re-reads the blob's current ETag,
//! 3. skips versions whose receipt is already completed,
//! 4. creates the receipt if absent (losing the race means retry later),
//! 5. takes the receipt lease (contention means retry later),
//! 6. re-checks completion under the lease,
//! 7. enqueues the trigger message,
//! 8. marks the receipt completed and releases the lease.
//!
//! Once the lease is held it is released on every path, including errors.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use blobwatch_core::{BlobPathPattern, BlobVersion, FunctionId, HostId, TriggerMessage};
use blobwatch_storage::LeaseId;

use crate::coordinator::{DispatchOutcome, TriggerExecutor};
use crate::error::ListenerError;
use crate::etag::ETagReader;
use crate::queue_writer::TriggerQueueWriter;
use crate::receipt::{ReceiptKey, ReceiptManager};

/// Turns discovered blob versions of one registered function into at most
/// one trigger message each, guarded by a leased receipt.
pub struct BlobTriggerDispatcher {
    host_id: HostId,
    function_id: FunctionId,
    pattern: BlobPathPattern,
    etag_reader: Arc<dyn ETagReader>,
    receipts: Arc<ReceiptManager>,
    queue_writer: Arc<TriggerQueueWriter>,
}

impl BlobTriggerDispatcher {
    /// `receipts` and `queue_writer` may be shared by every dispatcher of a
    /// listener.
    pub fn new(
        host_id: HostId,
        function_id: FunctionId,
        pattern: BlobPathPattern,
        etag_reader: Arc<dyn ETagReader>,
        receipts: Arc<ReceiptManager>,
        queue_writer: Arc<TriggerQueueWriter>,
    ) -> Self {
        Self {
            host_id,
            function_id,
            pattern,
            etag_reader,
            receipts,
            queue_writer,
        }
    }

    pub fn function_id(&self) -> &FunctionId {
        &self.function_id
    }

    /// Steps 6 to 8, run while holding the receipt lease.
    async fn dispatch_leased(
        &self,
        key: &ReceiptKey,
        lease: &LeaseId,
        current: &BlobVersion,
    ) -> Result<DispatchOutcome, ListenerError> {
        if self
            .receipts
            .try_read(key)
            .await?
            .is_some_and(|r| r.is_completed)
        {
            debug!("receipt completed by another process while leasing");
            return Ok(DispatchOutcome::AlreadyDispatched);
        }

        let message = TriggerMessage::from_version(self.function_id.clone(), current)?;
        self.queue_writer.enqueue(&message).await?;
        self.receipts.mark_completed(key, lease).await?;
        Ok(DispatchOutcome::Dispatched)
    }
}

#[async_trait]
impl TriggerExecutor for BlobTriggerDispatcher {
    #[instrument(
        name = "blobwatch.dispatch",
        skip(self, discovered),
        fields(function = %self.function_id, blob = %discovered.blob)
    )]
    async fn execute(&self, discovered: &BlobVersion) -> Result<DispatchOutcome, ListenerError> {
        if self.pattern.matches(&discovered.blob).is_none() {
            return Ok(DispatchOutcome::Ignored);
        }

        let Some(current) = self.etag_reader.read_current(&discovered.blob).await? else {
            debug!("blob no longer exists");
            return Ok(DispatchOutcome::Ignored);
        };
        let Some(etag) = current.etag.clone() else {
            return Ok(DispatchOutcome::Ignored);
        };

        let key = self
            .receipts
            .create_reference(&self.host_id, &self.function_id, &current.blob, &etag);

        match self.receipts.try_read(&key).await? {
            Some(receipt) if receipt.is_completed => {
                debug!(etag = %etag, "already dispatched");
                return Ok(DispatchOutcome::AlreadyDispatched);
            }
            Some(_) => {}
            None => {
                if !self.receipts.try_create(&key).await? {
                    debug!(etag = %etag, "lost receipt creation race");
                    return Ok(DispatchOutcome::RetryLater);
                }
            }
        }

        let Some(lease) = self.receipts.try_acquire_lease(&key).await? else {
            debug!(etag = %etag, "receipt is leased elsewhere");
            return Ok(DispatchOutcome::RetryLater);
        };

        let outcome = match self.dispatch_leased(&key, &lease, &current).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(release_err) = self.receipts.release_lease(&key, &lease).await {
                    warn!(error = %release_err, "failed to release receipt lease");
                }
                return Err(e);
            }
        };

        self.receipts.release_lease(&key, &lease).await?;
        debug!(etag = %etag, ?outcome, "dispatch finished");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use blobwatch_core::{BlobIdentity, ETag};
    use blobwatch_queue::{MemoryQueue, MessageId, MessageQueue, QueueError, QueueMessage};
    use blobwatch_storage::{
        BlobLookup, BlobStorage, ContinuationToken, CreateOutcome, LeaseOutcome, ListResult,
        LoggingProperties, Metadata, StorageError,
    };
    use blobwatch_storage_memory::MemoryBlobStorage;

    use super::*;
    use crate::etag::StorageETagReader;

    const RECEIPTS: &str = "receipts";

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Interference {
        /// Another process creates the receipt right after our first read.
        CreateAfterFirstRead,
        /// Our first read misses a completion that already happened.
        StaleFirstRead,
    }

    /// Delegates to memory storage, simulating a competing process on the
    /// first receipt read.
    struct CompetingStorage {
        inner: MemoryBlobStorage,
        interference: Interference,
        first_read_done: AtomicBool,
    }

    impl CompetingStorage {
        fn new(inner: MemoryBlobStorage, interference: Interference) -> Self {
            Self {
                inner,
                interference,
                first_read_done: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl BlobStorage for CompetingStorage {
        async fn get_properties(&self, blob: &BlobIdentity) -> Result<BlobLookup, StorageError> {
            let lookup = self.inner.get_properties(blob).await?;
            if blob.container != RECEIPTS || self.first_read_done.swap(true, Ordering::SeqCst) {
                return Ok(lookup);
            }
            match self.interference {
                Interference::CreateAfterFirstRead => {
                    self.inner.create_if_not_exists(blob, Metadata::new()).await?;
                    Ok(lookup)
                }
                Interference::StaleFirstRead => Ok(match lookup {
                    BlobLookup::Found(mut props) => {
                        props.metadata.clear();
                        BlobLookup::Found(props)
                    }
                    BlobLookup::NotFound => BlobLookup::NotFound,
                }),
            }
        }

        async fn list_blobs(
            &self,
            container: &str,
            prefix: Option<&str>,
            max_results: usize,
            continuation: Option<&ContinuationToken>,
        ) -> Result<ListResult, StorageError> {
            self.inner
                .list_blobs(container, prefix, max_results, continuation)
                .await
        }

        async fn read_text(&self, blob: &BlobIdentity) -> Result<Option<String>, StorageError> {
            self.inner.read_text(blob).await
        }

        async fn create_if_not_exists(
            &self,
            blob: &BlobIdentity,
            metadata: Metadata,
        ) -> Result<CreateOutcome, StorageError> {
            self.inner.create_if_not_exists(blob, metadata).await
        }

        async fn set_metadata(
            &self,
            blob: &BlobIdentity,
            metadata: Metadata,
            lease: &LeaseId,
        ) -> Result<(), StorageError> {
            self.inner.set_metadata(blob, metadata, lease).await
        }

        async fn try_acquire_lease(
            &self,
            blob: &BlobIdentity,
            duration: Duration,
        ) -> Result<LeaseOutcome, StorageError> {
            self.inner.try_acquire_lease(blob, duration).await
        }

        async fn release_lease(
            &self,
            blob: &BlobIdentity,
            lease: &LeaseId,
        ) -> Result<(), StorageError> {
            self.inner.release_lease(blob, lease).await
        }

        async fn logging_properties(&self) -> Result<LoggingProperties, StorageError> {
            self.inner.logging_properties().await
        }

        async fn set_logging_properties(
            &self,
            properties: LoggingProperties,
        ) -> Result<(), StorageError> {
            self.inner.set_logging_properties(properties).await
        }
    }

    /// A queue whose enqueue always fails.
    struct BrokenQueue;

    #[async_trait]
    impl MessageQueue for BrokenQueue {
        fn name(&self) -> &str {
            "broken"
        }

        async fn enqueue(&self, _payload: &str) -> Result<MessageId, QueueError> {
            Err(QueueError::Connection("queue unreachable".into()))
        }

        async fn dequeue(&self, _: Duration) -> Result<Option<QueueMessage>, QueueError> {
            Ok(None)
        }

        async fn delete(&self, _: &QueueMessage) -> Result<(), QueueError> {
            Ok(())
        }

        async fn release(&self, _: &QueueMessage) -> Result<(), QueueError> {
            Ok(())
        }

        async fn len(&self) -> Result<usize, QueueError> {
            Ok(0)
        }
    }

    struct Fixture {
        dispatcher: Arc<BlobTriggerDispatcher>,
        receipts: Arc<ReceiptManager>,
    }

    fn fixture(storage: Arc<dyn BlobStorage>, queue: Arc<dyn MessageQueue>) -> Fixture {
        let receipts = Arc::new(ReceiptManager::new(
            Arc::clone(&storage),
            RECEIPTS,
            Duration::from_secs(30),
        ));
        let dispatcher = Arc::new(BlobTriggerDispatcher::new(
            HostId::new("host"),
            FunctionId::new("F"),
            BlobPathPattern::parse("container/{name}.csv").unwrap(),
            Arc::new(StorageETagReader::new(storage)),
            Arc::clone(&receipts),
            Arc::new(TriggerQueueWriter::new(queue)),
        ));
        Fixture {
            dispatcher,
            receipts,
        }
    }

    fn receipt_key(receipts: &ReceiptManager, blob: &BlobIdentity, etag: &ETag) -> ReceiptKey {
        receipts.create_reference(&HostId::new("host"), &FunctionId::new("F"), blob, etag)
    }

    #[tokio::test]
    async fn dispatches_each_version_once() {
        let storage = Arc::new(MemoryBlobStorage::new());
        let queue = Arc::new(MemoryQueue::new("triggers"));
        let fx = fixture(storage.clone(), queue.clone());
        let blob = BlobIdentity::block("container", "a.csv");

        let e1 = storage.put_blob(&blob, "v1").etag;
        let discovered = BlobVersion::new(blob.clone());
        assert_eq!(
            fx.dispatcher.execute(&discovered).await.unwrap(),
            DispatchOutcome::Dispatched
        );
        assert_eq!(
            fx.dispatcher.execute(&discovered).await.unwrap(),
            DispatchOutcome::AlreadyDispatched
        );
        assert_eq!(queue.message_count(), 1);

        let message = TriggerMessage::from_json(&queue.payloads()[0]).unwrap();
        assert_eq!(message.function_id.as_str(), "F");
        assert_eq!(message.blob(), blob);
        assert_eq!(message.etag, e1);

        let e2 = storage.put_blob(&blob, "v2").etag;
        assert_ne!(e1, e2);
        assert_eq!(
            fx.dispatcher.execute(&discovered).await.unwrap(),
            DispatchOutcome::Dispatched
        );
        assert_eq!(queue.message_count(), 2);
        let second = TriggerMessage::from_json(&queue.payloads()[1]).unwrap();
        assert_eq!(second.etag, e2);
    }

    #[tokio::test]
    async fn non_matching_and_missing_blobs_are_ignored() {
        let storage = Arc::new(MemoryBlobStorage::new());
        let queue = Arc::new(MemoryQueue::new("triggers"));
        let fx = fixture(storage.clone(), queue.clone());

        let txt = BlobIdentity::block("container", "a.txt");
        storage.put_blob(&txt, "");
        assert_eq!(
            fx.dispatcher.execute(&BlobVersion::new(txt)).await.unwrap(),
            DispatchOutcome::Ignored
        );

        let gone = BlobIdentity::block("container", "gone.csv");
        assert_eq!(
            fx.dispatcher.execute(&BlobVersion::new(gone)).await.unwrap(),
            DispatchOutcome::Ignored
        );

        assert_eq!(queue.message_count(), 0);
        assert_eq!(storage.blob_count(RECEIPTS), 0, "no receipts for ignored blobs");
    }

    #[tokio::test]
    async fn lost_creation_race_retries_later() {
        let memory = MemoryBlobStorage::new();
        let blob = BlobIdentity::block("container", "a.csv");
        memory.put_blob(&blob, "");
        let storage = Arc::new(CompetingStorage::new(
            memory,
            Interference::CreateAfterFirstRead,
        ));
        let queue = Arc::new(MemoryQueue::new("triggers"));
        let fx = fixture(storage, queue.clone());

        let discovered = BlobVersion::new(blob);
        assert_eq!(
            fx.dispatcher.execute(&discovered).await.unwrap(),
            DispatchOutcome::RetryLater
        );
        assert_eq!(queue.message_count(), 0);

        // The next attempt finds the receipt and proceeds.
        assert_eq!(
            fx.dispatcher.execute(&discovered).await.unwrap(),
            DispatchOutcome::Dispatched
        );
    }

    #[tokio::test]
    async fn leased_receipt_retries_later() {
        let storage = Arc::new(MemoryBlobStorage::new());
        let queue = Arc::new(MemoryQueue::new("triggers"));
        let fx = fixture(storage.clone(), queue.clone());
        let blob = BlobIdentity::block("container", "a.csv");
        let etag = storage.put_blob(&blob, "").etag;

        let key = receipt_key(&fx.receipts, &blob, &etag);
        assert!(fx.receipts.try_create(&key).await.unwrap());
        let held = fx.receipts.try_acquire_lease(&key).await.unwrap().unwrap();

        assert_eq!(
            fx.dispatcher.execute(&BlobVersion::new(blob)).await.unwrap(),
            DispatchOutcome::RetryLater
        );
        assert_eq!(queue.message_count(), 0);
        fx.receipts.release_lease(&key, &held).await.unwrap();
    }

    #[tokio::test]
    async fn completion_seen_under_lease_skips_enqueue() {
        let memory = MemoryBlobStorage::new();
        let blob = BlobIdentity::block("container", "a.csv");
        let etag = memory.put_blob(&blob, "").etag;
        let storage = Arc::new(CompetingStorage::new(
            memory.clone(),
            Interference::StaleFirstRead,
        ));
        let queue = Arc::new(MemoryQueue::new("triggers"));
        let fx = fixture(storage, queue.clone());

        // Another process already completed this version.
        let key = receipt_key(&fx.receipts, &blob, &etag);
        let other = ReceiptManager::new(Arc::new(memory), RECEIPTS, Duration::from_secs(30));
        other.try_create(&key).await.unwrap();
        let lease = other.try_acquire_lease(&key).await.unwrap().unwrap();
        other.mark_completed(&key, &lease).await.unwrap();
        other.release_lease(&key, &lease).await.unwrap();

        assert_eq!(
            fx.dispatcher.execute(&BlobVersion::new(blob)).await.unwrap(),
            DispatchOutcome::AlreadyDispatched
        );
        assert_eq!(queue.message_count(), 0);
        assert!(
            fx.receipts.try_acquire_lease(&key).await.unwrap().is_some(),
            "lease must have been released"
        );
    }

    #[tokio::test]
    async fn enqueue_failure_releases_lease_and_leaves_receipt_open() {
        let storage = Arc::new(MemoryBlobStorage::new());
        let fx = fixture(storage.clone(), Arc::new(BrokenQueue));
        let blob = BlobIdentity::block("container", "a.csv");
        let etag = storage.put_blob(&blob, "").etag;

        let err = fx
            .dispatcher
            .execute(&BlobVersion::new(blob.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ListenerError::Queue(_)));
        assert!(err.is_retryable());

        let key = receipt_key(&fx.receipts, &blob, &etag);
        let receipt = fx.receipts.try_read(&key).await.unwrap().unwrap();
        assert!(!receipt.is_completed);
        assert!(
            fx.receipts.try_acquire_lease(&key).await.unwrap().is_some(),
            "lease must have been released"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_discoveries_enqueue_once() {
        let storage = Arc::new(MemoryBlobStorage::new());
        let queue = Arc::new(MemoryQueue::new("triggers"));
        let blob = BlobIdentity::block("container", "a.csv");
        storage.put_blob(&blob, "");

        // Separate dispatcher instances model separate processes.
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let fx = fixture(storage.clone(), queue.clone());
                let discovered = BlobVersion::new(blob.clone());
                tokio::spawn(async move { fx.dispatcher.execute(&discovered).await })
            })
            .collect();

        let mut dispatched = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == DispatchOutcome::Dispatched {
                dispatched += 1;
            }
        }
        assert_eq!(dispatched, 1);
        assert_eq!(queue.message_count(), 1);
    }
}
