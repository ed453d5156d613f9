use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::QueueError;
use crate::queue::{MessageId, MessageQueue, PopReceipt, QueueMessage};
use crate::watcher::QueueWatcher;

#[derive(Debug)]
struct Entry {
    id: MessageId,
    payload: String,
    inserted_at: DateTime<Utc>,
    dequeue_count: u32,
    visible_at: Instant,
    pop_receipt: Option<PopReceipt>,
}

impl Entry {
    fn is_visible(&self, now: Instant) -> bool {
        self.visible_at <= now
    }

    fn is_held_by(&self, message: &QueueMessage) -> bool {
        self.id == message.id && self.pop_receipt == Some(message.pop_receipt)
    }
}

/// In-memory [`MessageQueue`].
///
/// Messages are kept in insertion order behind a mutex; visibility timeouts
/// run on the tokio clock.
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    entries: Mutex<VecDeque<Entry>>,
    watcher: Arc<QueueWatcher>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(VecDeque::new()),
            watcher: Arc::new(QueueWatcher::new()),
        }
    }

    /// Payloads of every message still in the queue, in insertion order.
    pub fn payloads(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|e| e.payload.clone())
            .collect()
    }

    pub fn message_count(&self) -> usize {
        self.entries.lock().len()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, payload: &str) -> Result<MessageId, QueueError> {
        let id = MessageId::new();
        self.entries.lock().push_back(Entry {
            id,
            payload: payload.to_owned(),
            inserted_at: Utc::now(),
            dequeue_count: 0,
            visible_at: Instant::now(),
            pop_receipt: None,
        });
        self.watcher.notify_enqueued();
        Ok(id)
    }

    async fn dequeue(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let now = Instant::now();
        let visible_at = now.checked_add(visibility_timeout).ok_or_else(|| {
            QueueError::InvalidArgument(format!(
                "visibility timeout of {visibility_timeout:?} is out of range"
            ))
        })?;
        let mut entries = self.entries.lock();

        let Some(entry) = entries.iter_mut().find(|e| e.is_visible(now)) else {
            return Ok(None);
        };

        let pop_receipt = PopReceipt::new();
        entry.dequeue_count += 1;
        entry.visible_at = visible_at;
        entry.pop_receipt = Some(pop_receipt);

        Ok(Some(QueueMessage {
            id: entry.id,
            pop_receipt,
            payload: entry.payload.clone(),
            dequeue_count: entry.dequeue_count,
            inserted_at: entry.inserted_at,
        }))
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut entries = self.entries.lock();
        let position = entries
            .iter()
            .position(|e| e.id == message.id)
            .ok_or_else(|| QueueError::NotFound(message.id.to_string()))?;

        if !entries[position].is_held_by(message) {
            return Err(QueueError::PopReceiptMismatch(message.id.to_string()));
        }
        entries.remove(position);
        Ok(())
    }

    async fn release(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == message.id)
            .ok_or_else(|| QueueError::NotFound(message.id.to_string()))?;

        if !entry.is_held_by(message) {
            return Err(QueueError::PopReceiptMismatch(message.id.to_string()));
        }
        entry.visible_at = Instant::now();
        entry.pop_receipt = None;
        drop(entries);

        self.watcher.notify_enqueued();
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.message_count())
    }

    fn watcher(&self) -> Option<Arc<QueueWatcher>> {
        Some(Arc::clone(&self.watcher))
    }
}
