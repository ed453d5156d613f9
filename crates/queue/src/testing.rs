use std::time::Duration;

use crate::error::QueueError;
use crate::queue::MessageQueue;

const VISIBILITY: Duration = Duration::from_secs(600);

/// Run the queue conformance test suite against an empty queue.
///
/// # Errors
///
/// Returns an error if the backend fails an operation outright.
pub async fn run_queue_conformance_tests(queue: &dyn MessageQueue) -> Result<(), QueueError> {
    test_empty_dequeue(queue).await?;
    test_fifo_and_delete(queue).await?;
    test_dequeued_message_is_hidden(queue).await?;
    test_release_redelivers(queue).await?;
    Ok(())
}

async fn test_empty_dequeue(queue: &dyn MessageQueue) -> Result<(), QueueError> {
    assert!(queue.is_empty().await?, "queue should start empty");
    assert!(queue.dequeue(VISIBILITY).await?.is_none());
    Ok(())
}

async fn test_fifo_and_delete(queue: &dyn MessageQueue) -> Result<(), QueueError> {
    queue.enqueue("first").await?;
    queue.enqueue("second").await?;
    assert_eq!(queue.len().await?, 2);

    let first = queue.dequeue(VISIBILITY).await?.expect("first message");
    assert_eq!(first.payload, "first");
    assert_eq!(first.dequeue_count, 1);
    queue.delete(&first).await?;

    let second = queue.dequeue(VISIBILITY).await?.expect("second message");
    assert_eq!(second.payload, "second");
    queue.delete(&second).await?;

    assert!(queue.is_empty().await?);
    Ok(())
}

async fn test_dequeued_message_is_hidden(queue: &dyn MessageQueue) -> Result<(), QueueError> {
    queue.enqueue("hidden").await?;
    let message = queue.dequeue(VISIBILITY).await?.expect("message");
    assert!(
        queue.dequeue(VISIBILITY).await?.is_none(),
        "a delivered message must be invisible to other consumers"
    );
    assert_eq!(queue.len().await?, 1, "hidden messages still count");
    queue.delete(&message).await?;
    Ok(())
}

async fn test_release_redelivers(queue: &dyn MessageQueue) -> Result<(), QueueError> {
    queue.enqueue("retry").await?;
    let first = queue.dequeue(VISIBILITY).await?.expect("message");
    queue.release(&first).await?;

    let second = queue
        .dequeue(VISIBILITY)
        .await?
        .expect("released message should be visible");
    assert_eq!(second.id, first.id);
    assert_eq!(second.dequeue_count, 2);
    assert_ne!(second.pop_receipt, first.pop_receipt);
    queue.delete(&second).await?;
    Ok(())
}
