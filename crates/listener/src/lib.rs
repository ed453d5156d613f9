//! Blob change discovery with exactly-once trigger dispatch.
//!
//! Discovery sources (storage write logs, container sweeps, explicit
//! notifications) feed a [`PollingCoordinator`]. Every discovered blob
//! version is pushed through a [`BlobTriggerDispatcher`], which uses a
//! leased receipt object per version to enqueue at most one
//! [`TriggerMessage`](blobwatch_core::TriggerMessage). The
//! [`TriggerQueueConsumer`] replays those messages into registered
//! functions. [`BlobListener`] ties it all together.

pub mod backoff;
pub mod builder;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod etag;
pub mod listener;
pub mod log_scan;
pub mod metrics;
pub mod notifications;
pub mod queue_listener;
pub mod queue_writer;
pub mod receipt;
pub mod replay;
pub mod sweep;

pub use backoff::ExponentialBackoff;
pub use builder::BlobListenerBuilder;
pub use config::{ListenerConfig, QueueConfig, ScanMode};
pub use coordinator::{
    DispatchOutcome, PollingCoordinator, Registration, TickSummary, TriggerExecutor,
};
pub use dispatch::BlobTriggerDispatcher;
pub use error::ListenerError;
pub use etag::{ETagReader, StorageETagReader};
pub use listener::BlobListener;
pub use log_scan::{LOG_CONTAINER, StorageLogScanner};
pub use metrics::{ListenerMetrics, MetricsSnapshot};
pub use notifications::{BlobWrittenWatcher, NotificationQueue};
pub use queue_listener::{MessageDisposition, TriggerQueueConsumer};
pub use queue_writer::TriggerQueueWriter;
pub use receipt::{Receipt, ReceiptKey, ReceiptManager};
pub use replay::{FunctionInvoker, Invocation, QueueTriggerReplayer};
pub use sweep::{ContainerScanState, ContainerSweepScanner};
