//! The polling coordinator: merges every discovery source and hands each
//! discovered blob to the registrations for its container.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use blobwatch_core::{BlobPathPattern, BlobVersion, FunctionId};
use blobwatch_storage::BlobStorage;

use crate::config::{ListenerConfig, ScanMode};
use crate::error::ListenerError;
use crate::log_scan::StorageLogScanner;
use crate::metrics::ListenerMetrics;
use crate::notifications::NotificationQueue;
use crate::sweep::{ContainerScanState, ContainerSweepScanner};

/// Result of handing one discovered blob to one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A trigger message was enqueued and the receipt completed.
    Dispatched,
    /// The receipt for this version was already completed.
    AlreadyDispatched,
    /// The blob did not match the pattern or no longer exists.
    Ignored,
    /// Another process holds the receipt; try again on a later tick.
    RetryLater,
}

impl DispatchOutcome {
    #[must_use]
    pub fn is_success(self) -> bool {
        !matches!(self, Self::RetryLater)
    }
}

/// Callback invoked for each discovered blob in a registered container.
#[async_trait]
pub trait TriggerExecutor: Send + Sync {
    async fn execute(&self, blob: &BlobVersion) -> Result<DispatchOutcome, ListenerError>;
}

/// One function's interest in a container.
#[derive(Clone)]
pub struct Registration {
    pub function_id: FunctionId,
    pub pattern: BlobPathPattern,
    pub executor: Arc<dyn TriggerExecutor>,
}

/// Counts from a single tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Blobs taken from the notification queue.
    pub notified: usize,
    /// Blobs yielded by the log and sweep scanners.
    pub scanned: usize,
    /// Blobs put back on the notification queue for the next tick.
    pub requeued: usize,
}

#[derive(Default)]
struct Registry {
    started: bool,
    by_container: BTreeMap<String, Vec<Registration>>,
}

pub struct PollingCoordinator {
    storage: Arc<dyn BlobStorage>,
    notifications: Arc<NotificationQueue>,
    metrics: Arc<ListenerMetrics>,
    requested_mode: ScanMode,
    mode: OnceLock<ScanMode>,
    polling_interval: Duration,
    scan_limit_per_poll: usize,
    log_scanner: StorageLogScanner,
    sweeper: ContainerSweepScanner,
    registry: RwLock<Registry>,
    sweep_states: tokio::sync::Mutex<HashMap<String, ContainerScanState>>,
}

impl PollingCoordinator {
    pub fn new(
        storage: Arc<dyn BlobStorage>,
        notifications: Arc<NotificationQueue>,
        metrics: Arc<ListenerMetrics>,
        config: &ListenerConfig,
    ) -> Self {
        Self {
            log_scanner: StorageLogScanner::new(
                Arc::clone(&storage),
                config.log_window_hours,
                config.log_retention_days,
                config.log_cache_capacity,
            ),
            sweeper: ContainerSweepScanner::new(Arc::clone(&storage)),
            storage,
            notifications,
            metrics,
            requested_mode: config.scan_mode,
            mode: OnceLock::new(),
            polling_interval: config.polling_interval(),
            scan_limit_per_poll: config.scan_blob_limit_per_poll,
            registry: RwLock::new(Registry::default()),
            sweep_states: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Add a registration. Only legal before [`start`](Self::start).
    pub fn register(&self, registration: Registration) -> Result<(), ListenerError> {
        let mut registry = self.registry.write();
        if registry.started {
            return Err(ListenerError::InvalidOperation(
                "registrations must be added before the listener starts".into(),
            ));
        }

        debug!(
            function = %registration.function_id,
            pattern = %registration.pattern,
            "registered blob trigger"
        );
        registry
            .by_container
            .entry(registration.pattern.container().to_owned())
            .or_default()
            .push(registration);
        Ok(())
    }

    /// Freeze registrations and pick the scan mode.
    pub fn start(&self) -> Result<ScanMode, ListenerError> {
        let mut registry = self.registry.write();
        if registry.started {
            return Err(ListenerError::InvalidOperation(
                "polling coordinator already started".into(),
            ));
        }
        registry.started = true;

        let mode = *self
            .mode
            .get_or_init(|| self.requested_mode.resolve(self.storage.supports_write_logging()));
        info!(
            ?mode,
            containers = registry.by_container.len(),
            "polling coordinator started"
        );
        Ok(mode)
    }

    /// Whether registrations have been frozen by [`start`](Self::start).
    pub fn is_started(&self) -> bool {
        self.registry.read().started
    }

    /// The resolved scan mode, once started.
    pub fn scan_mode(&self) -> Option<ScanMode> {
        self.mode.get().copied()
    }

    pub fn containers(&self) -> Vec<String> {
        self.registry.read().by_container.keys().cloned().collect()
    }

    /// Queue a blob for the next tick.
    pub fn notify(&self, blob: BlobVersion) {
        self.notifications.push(blob);
    }

    pub fn notifications(&self) -> &Arc<NotificationQueue> {
        &self.notifications
    }

    /// Run ticks until `cancel` fires. Each wait starts after the previous
    /// tick has fully completed.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(self.polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("polling coordinator received shutdown signal");
                    return;
                }
                _ = ticker.tick() => {
                    match self.tick(&cancel).await {
                        Ok(summary) => debug!(?summary, "polling tick complete"),
                        Err(e) => {
                            error!(error = %e, "polling coordinator stopped");
                            return;
                        }
                    }
                    ticker.reset();
                }
            }
        }
    }

    /// One polling pass: drain notifications, then scan, then re-queue
    /// anything that failed.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickSummary, ListenerError> {
        let mode = self.scan_mode().ok_or_else(|| {
            ListenerError::InvalidOperation("polling coordinator has not been started".into())
        })?;

        let failed = Mutex::new(Vec::new());
        let mut summary = TickSummary::default();

        let drained = self.notifications.drain_all();
        summary.notified = drained.len();
        self.notify_all(drained, cancel, &failed).await;

        if !cancel.is_cancelled() {
            let logs = async {
                if mode.scans_logs() {
                    self.poll_logs(cancel, &failed).await
                } else {
                    0
                }
            };

            let mut states = self.sweep_states.lock().await;
            if mode.sweeps_containers() {
                for container in self.containers() {
                    states.entry(container).or_default();
                }
            }
            let page_size = (self.scan_limit_per_poll / states.len().max(1)).max(1);
            let sweeps = join_all(
                states
                    .iter_mut()
                    .filter(|_| mode.sweeps_containers())
                    .map(|(container, state)| {
                        self.poll_container(container, state, page_size, cancel, &failed)
                    }),
            );

            let (from_logs, from_sweeps) = tokio::join!(logs, sweeps);
            summary.scanned = from_logs + from_sweeps.into_iter().sum::<usize>();
        }

        let failed = failed.into_inner();
        summary.requeued = failed.len();
        if !failed.is_empty() {
            debug!(count = failed.len(), "re-queueing blobs for the next tick");
            self.notifications.extend(failed);
        }
        Ok(summary)
    }

    /// List every registered container once and queue all of its blobs.
    pub async fn initial_scan(&self, cancel: &CancellationToken) {
        for container in self.containers() {
            if cancel.is_cancelled() {
                return;
            }
            match self.sweeper.list_all(&container).await {
                Ok(blobs) => {
                    info!(container = %container, count = blobs.len(), "initial container scan complete");
                    self.notifications.extend(blobs);
                }
                Err(e) => warn!(container = %container, error = %e, "initial container scan failed"),
            }
        }
    }

    async fn poll_logs(&self, cancel: &CancellationToken, failed: &Mutex<Vec<BlobVersion>>) -> usize {
        match self.log_scanner.get_recent_writes().await {
            Ok(blobs) => {
                let count = blobs.len();
                self.notify_all(blobs, cancel, failed).await;
                count
            }
            Err(e) => {
                warn!(error = %e, "storage log scan failed");
                0
            }
        }
    }

    async fn poll_container(
        &self,
        container: &str,
        state: &mut ContainerScanState,
        page_size: usize,
        cancel: &CancellationToken,
        failed: &Mutex<Vec<BlobVersion>>,
    ) -> usize {
        if cancel.is_cancelled() {
            return 0;
        }
        match self.sweeper.poll_new_blobs(container, state, page_size).await {
            Ok(blobs) => {
                let count = blobs.len();
                self.notify_all(blobs, cancel, failed).await;
                count
            }
            Err(e) => {
                warn!(container, error = %e, "container sweep failed");
                0
            }
        }
    }

    // Once cancelled, the rest of the batch is re-queued instead of dropped.
    async fn notify_all(
        &self,
        blobs: Vec<BlobVersion>,
        cancel: &CancellationToken,
        failed: &Mutex<Vec<BlobVersion>>,
    ) {
        let mut blobs = blobs.into_iter();
        while let Some(blob) = blobs.next() {
            if cancel.is_cancelled() {
                let mut failed = failed.lock();
                failed.push(blob);
                failed.extend(blobs);
                return;
            }
            if !self.notify_registrations(&blob, cancel).await {
                failed.lock().push(blob);
            }
        }
    }

    /// Returns `false` if any registration asked for the blob to be retried.
    async fn notify_registrations(&self, blob: &BlobVersion, cancel: &CancellationToken) -> bool {
        let registrations = self
            .registry
            .read()
            .by_container
            .get(&blob.blob.container)
            .cloned()
            .unwrap_or_default();

        // Notifications are host-wide; other containers are not ours.
        if registrations.is_empty() {
            return true;
        }
        self.metrics.increment_discovered();

        let mut succeeded = true;
        for registration in &registrations {
            if cancel.is_cancelled() {
                return false;
            }
            match registration.executor.execute(blob).await {
                Ok(outcome) => {
                    self.record(outcome);
                    succeeded &= outcome.is_success();
                }
                Err(e) => {
                    self.metrics.increment_dispatch_errors();
                    warn!(
                        function = %registration.function_id,
                        blob = %blob.blob,
                        error = %e,
                        "blob trigger dispatch failed"
                    );
                    succeeded = false;
                }
            }
        }
        succeeded
    }

    fn record(&self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Dispatched => self.metrics.increment_dispatched(),
            DispatchOutcome::AlreadyDispatched => self.metrics.increment_already_dispatched(),
            DispatchOutcome::Ignored => self.metrics.increment_ignored(),
            DispatchOutcome::RetryLater => self.metrics.increment_retry_later(),
        }
    }
}
