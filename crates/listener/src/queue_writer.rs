use std::sync::Arc;

use tracing::debug;

use blobwatch_core::TriggerMessage;
use blobwatch_queue::{MessageId, MessageQueue};

use crate::error::ListenerError;

/// Serializes trigger messages onto the durable trigger queue.
pub struct TriggerQueueWriter {
    queue: Arc<dyn MessageQueue>,
}

impl TriggerQueueWriter {
    /// Wrap the queue that the trigger consumer reads from.
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }

    /// Serialize `message` as JSON and enqueue it.
    ///
    /// # Errors
    ///
    /// Fails if serialization fails or the queue rejects the message.
    pub async fn enqueue(&self, message: &TriggerMessage) -> Result<MessageId, ListenerError> {
        let payload = message.to_json()?;
        let id = self.queue.enqueue(&payload).await?;
        debug!(
            queue = self.queue.name(),
            message_id = %id,
            function = %message.function_id,
            "trigger message enqueued"
        );
        Ok(id)
    }
}
