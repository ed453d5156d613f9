use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;
use crate::watcher::QueueWatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Token proving the holder is the consumer of the current delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PopReceipt(Uuid);

impl PopReceipt {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PopReceipt {
    fn default() -> Self {
        Self::new()
    }
}

/// One delivery of a queued payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: MessageId,
    pub pop_receipt: PopReceipt,
    pub payload: String,
    /// Number of times this message has been handed out, including this one.
    pub dequeue_count: u32,
    pub inserted_at: DateTime<Utc>,
}

/// A durable queue with visibility-timeout delivery semantics.
///
/// A dequeued message stays in the queue but is hidden from other consumers
/// until it is deleted, released, or its visibility timeout passes.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Queue name, used in logs.
    fn name(&self) -> &str;

    async fn enqueue(&self, payload: &str) -> Result<MessageId, QueueError>;

    /// Take the next visible message, hiding it for `visibility_timeout`.
    async fn dequeue(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, QueueError>;

    /// Permanently remove a delivered message.
    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Make a delivered message visible again immediately.
    async fn release(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Approximate number of messages, visible or not.
    async fn len(&self) -> Result<usize, QueueError>;

    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Hook signalled on every enqueue, if the backend provides one.
    fn watcher(&self) -> Option<Arc<QueueWatcher>> {
        None
    }
}
