//! The public face of the crate: register functions, then start and stop
//! discovery and replay as one unit.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, instrument};

use blobwatch_core::{BlobPathPattern, BlobVersion, FunctionId, HostId};
use blobwatch_queue::MessageQueue;
use blobwatch_storage::BlobStorage;

use crate::config::{ListenerConfig, ScanMode};
use crate::coordinator::{PollingCoordinator, Registration, TickSummary};
use crate::dispatch::BlobTriggerDispatcher;
use crate::error::ListenerError;
use crate::etag::ETagReader;
use crate::metrics::{ListenerMetrics, MetricsSnapshot};
use crate::notifications::NotificationQueue;
use crate::queue_listener::TriggerQueueConsumer;
use crate::queue_writer::TriggerQueueWriter;
use crate::receipt::ReceiptManager;
use crate::replay::{FunctionInvoker, QueueTriggerReplayer};

enum Lifecycle {
    Created,
    Running {
        cancel: CancellationToken,
        tasks: TaskTracker,
    },
    Stopped,
    Disposed,
}

/// Polls storage for new blobs, dispatches each version exactly once onto
/// the trigger queue and replays queued triggers into registered functions.
///
/// Lifecycle: [`register`](Self::register) before the first
/// [`start`](Self::start); `start` and [`stop`](Self::stop) alternate;
/// nothing but [`dispose`](Self::dispose) is accepted after `dispose`.
pub struct BlobListener {
    host_id: HostId,
    coordinator: Arc<PollingCoordinator>,
    consumer: Arc<TriggerQueueConsumer>,
    replayer: Arc<QueueTriggerReplayer>,
    etag_reader: Arc<dyn ETagReader>,
    receipts: Arc<ReceiptManager>,
    queue_writer: Arc<TriggerQueueWriter>,
    metrics: Arc<ListenerMetrics>,
    lifecycle: Mutex<Lifecycle>,
}

impl BlobListener {
    /// Create a builder.
    pub fn builder() -> crate::builder::BlobListenerBuilder {
        crate::builder::BlobListenerBuilder::new()
    }

    /// Wire every component together. `config` must already be validated.
    pub(crate) fn assemble(
        storage: Arc<dyn BlobStorage>,
        queue: Arc<dyn MessageQueue>,
        poison_queue: Option<Arc<dyn MessageQueue>>,
        etag_reader: Arc<dyn ETagReader>,
        config: &ListenerConfig,
    ) -> Self {
        let metrics = Arc::new(ListenerMetrics::default());
        let notifications = Arc::new(NotificationQueue::new());

        let coordinator = Arc::new(PollingCoordinator::new(
            Arc::clone(&storage),
            Arc::clone(&notifications),
            Arc::clone(&metrics),
            config,
        ));
        let replayer = Arc::new(QueueTriggerReplayer::new(
            Arc::clone(&etag_reader),
            notifications,
            Arc::clone(&metrics),
        ));
        let consumer = Arc::new(TriggerQueueConsumer::new(
            Arc::clone(&queue),
            poison_queue,
            Arc::clone(&replayer),
            config.queue.clone(),
            Arc::clone(&metrics),
        ));

        Self {
            host_id: HostId::new(config.host_id.clone()),
            coordinator,
            consumer,
            replayer,
            etag_reader,
            receipts: Arc::new(ReceiptManager::new(
                storage,
                config.receipt_container.clone(),
                config.lease_duration(),
            )),
            queue_writer: Arc::new(TriggerQueueWriter::new(queue)),
            metrics,
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    /// Register a function for blobs matching `pattern`
    /// (`container/name-template`).
    pub fn register(
        &self,
        function_id: impl Into<FunctionId>,
        pattern: &str,
        invoker: Arc<dyn FunctionInvoker>,
    ) -> Result<(), ListenerError> {
        self.ensure_not_disposed()?;
        if self.coordinator.is_started() {
            return Err(ListenerError::InvalidOperation(
                "registrations must be added before the listener starts".into(),
            ));
        }
        let function_id = function_id.into();
        // The id is a receipt key segment.
        if function_id.is_empty() || function_id.contains('/') {
            return Err(ListenerError::Configuration(format!(
                "function id '{function_id}' must be non-empty and must not contain '/'"
            )));
        }
        let pattern = BlobPathPattern::parse(pattern)?;

        let dispatcher = BlobTriggerDispatcher::new(
            self.host_id.clone(),
            function_id.clone(),
            pattern.clone(),
            Arc::clone(&self.etag_reader),
            Arc::clone(&self.receipts),
            Arc::clone(&self.queue_writer),
        );
        self.coordinator.register(Registration {
            function_id: function_id.clone(),
            pattern: pattern.clone(),
            executor: Arc::new(dispatcher),
        })?;
        self.replayer.register(function_id, pattern, invoker);
        Ok(())
    }

    /// Start polling and consuming. Must be called from within a tokio
    /// runtime.
    #[instrument(name = "blobwatch.start", skip(self), fields(host = %self.host_id))]
    pub fn start(&self) -> Result<ScanMode, ListenerError> {
        let mut lifecycle = self.lifecycle.lock();
        let first_start = match *lifecycle {
            Lifecycle::Created => true,
            Lifecycle::Stopped => false,
            Lifecycle::Running { .. } => {
                return Err(ListenerError::InvalidOperation(
                    "listener is already started".into(),
                ));
            }
            Lifecycle::Disposed => return Err(Self::disposed()),
        };

        let mode = match self.coordinator.scan_mode() {
            Some(mode) => mode,
            None => self.coordinator.start()?,
        };

        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();
        tasks.spawn(Arc::clone(&self.coordinator).run(cancel.clone()));
        tasks.spawn(Arc::clone(&self.consumer).run(cancel.clone()));

        // Without sweeps, blobs written before the logs window would never
        // be seen.
        if first_start && mode == ScanMode::Logs {
            let coordinator = Arc::clone(&self.coordinator);
            let scan_cancel = cancel.clone();
            tasks.spawn(async move { coordinator.initial_scan(&scan_cancel).await });
        }
        tasks.close();

        *lifecycle = Lifecycle::Running { cancel, tasks };
        info!(?mode, "blob listener started");
        Ok(mode)
    }

    /// Signal shutdown and wait for every background task to finish.
    pub async fn stop(&self) -> Result<(), ListenerError> {
        let tasks = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running { cancel, tasks } => {
                    cancel.cancel();
                    tasks
                }
                previous => {
                    let err = match previous {
                        Lifecycle::Disposed => Self::disposed(),
                        _ => ListenerError::InvalidOperation("listener is not started".into()),
                    };
                    *lifecycle = previous;
                    return Err(err);
                }
            }
        };
        tasks.wait().await;
        info!(host = %self.host_id, "blob listener stopped");
        Ok(())
    }

    /// Signal shutdown without waiting. A later [`stop`](Self::stop) still
    /// waits for the tasks to wind down.
    pub fn cancel(&self) -> Result<(), ListenerError> {
        match &*self.lifecycle.lock() {
            Lifecycle::Running { cancel, .. } => {
                cancel.cancel();
                Ok(())
            }
            Lifecycle::Disposed => Err(Self::disposed()),
            Lifecycle::Created | Lifecycle::Stopped => Ok(()),
        }
    }

    /// Cancel any running tasks and release the listener. Repeated calls are
    /// no-ops; every other call afterwards fails.
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Disposed);
        if let Lifecycle::Running { cancel, .. } = previous {
            cancel.cancel();
            info!(host = %self.host_id, "blob listener disposed while running");
        }
    }

    /// Hint that a blob was written, ahead of the next scan.
    pub fn notify(&self, blob: BlobVersion) -> Result<(), ListenerError> {
        self.ensure_not_disposed()?;
        self.coordinator.notify(blob);
        Ok(())
    }

    /// Run one polling pass immediately, outside the timer.
    pub async fn poll_once(&self) -> Result<TickSummary, ListenerError> {
        self.ensure_not_disposed()?;
        let cancel = match &*self.lifecycle.lock() {
            Lifecycle::Running { cancel, .. } => cancel.clone(),
            _ => CancellationToken::new(),
        };
        self.coordinator.tick(&cancel).await
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running { .. })
    }

    /// The resolved scan mode, once started.
    pub fn scan_mode(&self) -> Option<ScanMode> {
        self.coordinator.scan_mode()
    }

    pub fn host_id(&self) -> &HostId {
        &self.host_id
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn ensure_not_disposed(&self) -> Result<(), ListenerError> {
        if matches!(*self.lifecycle.lock(), Lifecycle::Disposed) {
            return Err(Self::disposed());
        }
        Ok(())
    }

    fn disposed() -> ListenerError {
        ListenerError::InvalidOperation("listener has been disposed".into())
    }
}

impl Drop for BlobListener {
    fn drop(&mut self) {
        if let Lifecycle::Running { cancel, .. } = &*self.lifecycle.get_mut() {
            cancel.cancel();
        }
    }
}
