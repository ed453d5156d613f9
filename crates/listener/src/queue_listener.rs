//! Consumes trigger messages and replays them, moving repeatedly failing
//! messages aside.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use blobwatch_queue::{MessageQueue, QueueMessage};

use crate::backoff::ExponentialBackoff;
use crate::config::QueueConfig;
use crate::error::ListenerError;
use crate::metrics::ListenerMetrics;
use crate::replay::QueueTriggerReplayer;

/// What happened to one dequeued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    /// Handled and deleted.
    Completed,
    /// Handed back to the queue for another attempt.
    Released,
    /// Exceeded the delivery limit and was removed from the queue.
    Poisoned,
}

pub struct TriggerQueueConsumer {
    queue: Arc<dyn MessageQueue>,
    poison_queue: Option<Arc<dyn MessageQueue>>,
    replayer: Arc<QueueTriggerReplayer>,
    config: QueueConfig,
    metrics: Arc<ListenerMetrics>,
}

impl TriggerQueueConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        poison_queue: Option<Arc<dyn MessageQueue>>,
        replayer: Arc<QueueTriggerReplayer>,
        config: QueueConfig,
        metrics: Arc<ListenerMetrics>,
    ) -> Self {
        Self {
            queue,
            poison_queue,
            replayer,
            config,
            metrics,
        }
    }

    /// Dequeue and handle at most one message. `None` if the queue was empty.
    pub async fn process_next(&self) -> Result<Option<MessageDisposition>, ListenerError> {
        let Some(message) = self
            .queue
            .dequeue(self.config.visibility_timeout())
            .await?
        else {
            return Ok(None);
        };

        if message.dequeue_count > self.config.max_dequeue_count {
            self.poison(&message).await?;
            return Ok(Some(MessageDisposition::Poisoned));
        }

        let handled = match self.replayer.execute(&message.payload).await {
            Ok(handled) => handled,
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    dequeue_count = message.dequeue_count,
                    error = %e,
                    "trigger message replay failed"
                );
                false
            }
        };

        if handled {
            self.queue.delete(&message).await?;
            Ok(Some(MessageDisposition::Completed))
        } else {
            self.queue.release(&message).await?;
            Ok(Some(MessageDisposition::Released))
        }
    }

    async fn poison(&self, message: &QueueMessage) -> Result<(), ListenerError> {
        self.metrics.increment_poisoned();
        match self
            .poison_queue
            .as_ref()
            .filter(|_| self.config.poison_queue_enabled)
        {
            Some(poison) => {
                poison.enqueue(&message.payload).await?;
                warn!(
                    message_id = %message.id,
                    dequeue_count = message.dequeue_count,
                    poison_queue = poison.name(),
                    "moved trigger message to poison queue"
                );
            }
            None => error!(
                message_id = %message.id,
                dequeue_count = message.dequeue_count,
                payload = %message.payload,
                "dropping trigger message after too many deliveries"
            ),
        }
        self.queue.delete(message).await?;
        Ok(())
    }

    /// Consume until `cancel` fires. An empty queue backs the poll interval
    /// off exponentially; any message or enqueue notification resets it.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = ExponentialBackoff::new(
            self.config.min_poll_interval(),
            self.config.max_poll_interval(),
        );
        let watcher = self.queue.watcher();
        info!(queue = self.queue.name(), "trigger queue consumer started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.process_next().await {
                Ok(Some(disposition)) => {
                    debug!(?disposition, "trigger message processed");
                    backoff.reset();
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "trigger queue poll failed"),
            }

            let delay = backoff.next_delay();
            let woken = tokio::select! {
                () = cancel.cancelled() => break,
                woken = async {
                    match &watcher {
                        Some(watcher) => watcher.wait(delay).await,
                        None => {
                            tokio::time::sleep(delay).await;
                            false
                        }
                    }
                } => woken,
            };
            if woken {
                backoff.reset();
            }
        }
        info!(queue = self.queue.name(), "trigger queue consumer stopped");
    }
}
