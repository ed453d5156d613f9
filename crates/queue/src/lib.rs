//! Durable queue abstraction used to hand discovered blobs from the
//! dispatch side to the replay side.

pub mod error;
pub mod memory;
pub mod queue;
pub mod testing;
pub mod watcher;

pub use error::QueueError;
pub use memory::MemoryQueue;
pub use queue::{MessageId, MessageQueue, PopReceipt, QueueMessage};
pub use watcher::QueueWatcher;
