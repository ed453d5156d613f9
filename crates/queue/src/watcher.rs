use std::time::Duration;

use tokio::sync::Notify;

/// Wakes idle consumers when a message is enqueued.
///
/// A notification sent while nobody is waiting is kept, so the next wait
/// returns immediately.
#[derive(Debug, Default)]
pub struct QueueWatcher {
    notify: Notify,
}

impl QueueWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_enqueued(&self) {
        self.notify.notify_one();
    }

    /// Wait for an enqueue notification for at most `timeout`.
    ///
    /// Returns `true` if woken by a notification.
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_ok()
    }
}
