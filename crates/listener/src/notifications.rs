use std::collections::VecDeque;

use parking_lot::Mutex;

use blobwatch_core::BlobVersion;

/// Receives fast-path hints that a blob was written.
///
/// Implemented by [`NotificationQueue`]; the replay side holds one so that a
/// stale trigger message can hand the blob's current version back to the
/// coordinator without waiting for a scan to find it.
pub trait BlobWrittenWatcher: Send + Sync {
    fn notify(&self, blob: BlobVersion);
}

/// Blobs discovered out of band, drained at the start of every polling tick.
///
/// Multi-producer and non-blocking. Duplicates are allowed; dispatch is
/// idempotent downstream.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    pending: Mutex<VecDeque<BlobVersion>>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, blob: BlobVersion) {
        self.pending.lock().push_back(blob);
    }

    pub fn extend(&self, blobs: impl IntoIterator<Item = BlobVersion>) {
        self.pending.lock().extend(blobs);
    }

    /// Remove and return everything queued so far, oldest first.
    pub fn drain_all(&self) -> Vec<BlobVersion> {
        self.pending.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobWrittenWatcher for NotificationQueue {
    fn notify(&self, blob: BlobVersion) {
        self.push(blob);
    }
}
