use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use blobwatch_core::{BlobIdentity, BlobVersion, ETag, FunctionId, TriggerMessage};
use blobwatch_listener::log_scan::search_prefix;
use blobwatch_listener::{
    BlobListener, FunctionInvoker, Invocation, LOG_CONTAINER, ListenerConfig, QueueConfig,
    ScanMode,
};
use blobwatch_queue::{MemoryQueue, MessageQueue};
use blobwatch_storage::{BlobStorage, Metadata};
use blobwatch_storage_memory::MemoryBlobStorage;

const FUNCTION: &str = "F";
const PATTERN: &str = "container/{name}.csv";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Records every invocation and answers with a fixed result.
struct RecordingInvoker {
    result: bool,
    calls: Mutex<Vec<Invocation>>,
}

impl RecordingInvoker {
    fn new(result: bool) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn etags(&self) -> Vec<ETag> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| c.blob.etag.clone())
            .collect()
    }
}

#[async_trait]
impl FunctionInvoker for RecordingInvoker {
    async fn invoke(&self, invocation: Invocation) -> bool {
        self.calls.lock().push(invocation);
        self.result
    }
}

struct Harness {
    storage: MemoryBlobStorage,
    queue: Arc<MemoryQueue>,
    poison: Arc<MemoryQueue>,
}

impl Harness {
    fn new() -> Self {
        init_tracing();
        Self {
            storage: MemoryBlobStorage::new(),
            queue: Arc::new(MemoryQueue::new("blob-triggers")),
            poison: Arc::new(MemoryQueue::new("blob-triggers-poison")),
        }
    }

    fn listener(&self, config: ListenerConfig) -> BlobListener {
        BlobListener::builder()
            .storage(Arc::new(self.storage.clone()))
            .queue(self.queue.clone())
            .poison_queue(self.poison.clone())
            .config(config)
            .build()
            .unwrap()
    }
}

fn config(mode: ScanMode) -> ListenerConfig {
    ListenerConfig {
        scan_mode: mode,
        ..ListenerConfig::default()
    }
}

fn csv(name: &str) -> BlobIdentity {
    BlobIdentity::block("container", name)
}

async fn run_for(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[tokio::test(start_paused = true)]
async fn each_blob_version_is_dispatched_and_invoked_once() {
    let harness = Harness::new();
    let listener = harness.listener(config(ScanMode::Sweep));
    let invoker = RecordingInvoker::new(true);
    listener
        .register(FUNCTION, PATTERN, invoker.clone())
        .unwrap();

    let e1 = harness.storage.put_blob(&csv("a.csv"), "v1").etag;
    harness.storage.put_blob(&csv("ignored.txt"), "");
    listener.start().unwrap();
    run_for(Duration::from_secs(1)).await;

    assert_eq!(invoker.etags(), vec![e1.clone()]);
    let first = invoker.calls.lock()[0].clone();
    assert_eq!(first.function_id, FunctionId::new(FUNCTION));
    assert_eq!(first.blob.blob, csv("a.csv"));
    assert_eq!(first.bindings.get("name").map(String::as_str), Some("a"));

    // Duplicate discovery of the same version.
    listener
        .notify(BlobVersion::new(csv("a.csv")))
        .unwrap();
    run_for(Duration::from_secs(10)).await;
    assert_eq!(invoker.etags(), vec![e1.clone()]);
    assert_eq!(listener.metrics().already_dispatched, 1);

    // A rewrite is a new version with its own receipt.
    let e2 = harness
        .storage
        .put_blob_at(&csv("a.csv"), "v2", Utc::now() + chrono::Duration::minutes(1))
        .etag;
    run_for(Duration::from_secs(10)).await;
    assert_eq!(invoker.etags(), vec![e1, e2]);

    listener.stop().await.unwrap();
    let metrics = listener.metrics();
    assert_eq!(metrics.dispatched, 2);
    assert_eq!(metrics.invoked, 2);
    assert_eq!(harness.queue.message_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn stale_message_is_deflected_to_current_version() {
    let harness = Harness::new();
    let listener = harness.listener(config(ScanMode::Sweep));
    let invoker = RecordingInvoker::new(true);
    listener
        .register(FUNCTION, PATTERN, invoker.clone())
        .unwrap();

    let blob = csv("a.csv");
    let e1 = harness.storage.put_blob(&blob, "v1").etag;
    let stale = TriggerMessage::new(FunctionId::new(FUNCTION), &blob, e1)
        .to_json()
        .unwrap();
    harness.queue.enqueue(&stale).await.unwrap();
    let e2 = harness.storage.put_blob(&blob, "v2").etag;

    listener.start().unwrap();
    run_for(Duration::from_secs(25)).await;
    listener.stop().await.unwrap();

    assert_eq!(invoker.etags(), vec![e2]);
    let metrics = listener.metrics();
    assert_eq!(metrics.stale_deflected, 1);
    assert_eq!(metrics.dispatched, 1);
    assert_eq!(metrics.invoked, 1);
}

#[tokio::test(start_paused = true)]
async fn write_logs_drive_discovery_in_logs_mode() {
    let harness = Harness::new();
    let listener = harness.listener(config(ScanMode::Logs));
    let invoker = RecordingInvoker::new(true);
    listener
        .register(FUNCTION, PATTERN, invoker.clone())
        .unwrap();
    listener.start().unwrap();
    run_for(Duration::from_secs(1)).await;
    assert!(invoker.etags().is_empty());

    let etag = harness.storage.put_blob(&csv("b.csv"), "x").etag;
    let row = "1.0;2024-03-05T10:15:00.1234567Z;PutBlob;Success;201;12;12;authenticated;\
               acct;acct;blob;\"https://acct.blob.core.windows.net/container/b.csv\";\
               \"/acct/container/b.csv\";0f3c;0;10.0.0.1:1234;2009-09-19";
    let metadata: Metadata = [("LogType".to_owned(), "write".to_owned())]
        .into_iter()
        .collect();
    harness.storage.put_blob_with_metadata(
        &BlobIdentity::block(
            LOG_CONTAINER,
            format!("{}/000000.log", search_prefix(Utc::now())),
        ),
        row,
        metadata,
    );

    run_for(Duration::from_secs(10)).await;
    listener.stop().await.unwrap();

    assert_eq!(invoker.etags(), vec![etag]);
    let logging = harness.storage.logging_properties().await.unwrap();
    assert!(logging.write);
    assert_eq!(logging.retention_days, Some(7));
}

#[tokio::test(start_paused = true)]
async fn repeatedly_failing_invocation_ends_in_poison_queue() {
    let harness = Harness::new();
    let listener = harness.listener(ListenerConfig {
        queue: QueueConfig {
            max_dequeue_count: 2,
            ..QueueConfig::default()
        },
        ..config(ScanMode::Sweep)
    });
    let invoker = RecordingInvoker::new(false);
    listener
        .register(FUNCTION, PATTERN, invoker.clone())
        .unwrap();
    harness.storage.put_blob(&csv("a.csv"), "x");

    listener.start().unwrap();
    run_for(Duration::from_secs(5)).await;
    listener.stop().await.unwrap();

    assert_eq!(invoker.calls.lock().len(), 2);
    assert_eq!(harness.queue.message_count(), 0);
    assert_eq!(harness.poison.message_count(), 1);
    assert_eq!(listener.metrics().poisoned, 1);
}

#[tokio::test(start_paused = true)]
async fn listeners_sharing_storage_dispatch_once() {
    let harness = Harness::new();
    let invoker = RecordingInvoker::new(true);
    let listeners: Vec<_> = (0..3)
        .map(|_| {
            let listener = harness.listener(config(ScanMode::Sweep));
            listener
                .register(FUNCTION, PATTERN, invoker.clone())
                .unwrap();
            listener
        })
        .collect();

    let etag = harness.storage.put_blob(&csv("a.csv"), "x").etag;
    for listener in &listeners {
        listener.start().unwrap();
    }
    run_for(Duration::from_secs(25)).await;
    for listener in &listeners {
        listener.stop().await.unwrap();
    }

    assert_eq!(invoker.etags(), vec![etag]);
    let dispatched: u64 = listeners.iter().map(|l| l.metrics().dispatched).sum();
    assert_eq!(dispatched, 1);
}
