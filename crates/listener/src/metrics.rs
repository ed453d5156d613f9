use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters tracking discovery and dispatch outcomes.
///
/// All counters use relaxed ordering. For a consistent point-in-time view,
/// call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct ListenerMetrics {
    /// Blobs handed to registrations by any discovery source.
    pub blobs_discovered: AtomicU64,
    /// Trigger messages enqueued.
    pub dispatched: AtomicU64,
    /// Discoveries whose receipt was already completed.
    pub already_dispatched: AtomicU64,
    /// Discoveries that did not match or whose blob was gone.
    pub ignored: AtomicU64,
    /// Discoveries that lost a create or lease race.
    pub retry_later: AtomicU64,
    /// Dispatch attempts that failed with an error.
    pub dispatch_errors: AtomicU64,
    /// Function invocations from the queue.
    pub invoked: AtomicU64,
    /// Queue messages whose ETag no longer matched.
    pub stale_deflected: AtomicU64,
    /// Messages moved to the poison queue.
    pub poisoned: AtomicU64,
}

macro_rules! counter {
    ($($fn_name:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $fn_name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl ListenerMetrics {
    counter! {
        increment_discovered => blobs_discovered,
        increment_dispatched => dispatched,
        increment_already_dispatched => already_dispatched,
        increment_ignored => ignored,
        increment_retry_later => retry_later,
        increment_dispatch_errors => dispatch_errors,
        increment_invoked => invoked,
        increment_stale_deflected => stale_deflected,
        increment_poisoned => poisoned,
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            blobs_discovered: self.blobs_discovered.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            already_dispatched: self.already_dispatched.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            retry_later: self.retry_later.load(Ordering::Relaxed),
            dispatch_errors: self.dispatch_errors.load(Ordering::Relaxed),
            invoked: self.invoked.load(Ordering::Relaxed),
            stale_deflected: self.stale_deflected.load(Ordering::Relaxed),
            poisoned: self.poisoned.load(Ordering::Relaxed),
        }
    }
}

/// A plain-data snapshot of [`ListenerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub blobs_discovered: u64,
    pub dispatched: u64,
    pub already_dispatched: u64,
    pub ignored: u64,
    pub retry_later: u64,
    pub dispatch_errors: u64,
    pub invoked: u64,
    pub stale_deflected: u64,
    pub poisoned: u64,
}
