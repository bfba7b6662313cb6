//! Queue contract consumed by the dispatcher.

use thiserror::Error;

/// Result of a successful enqueue.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome<T> {
	/// Item was enqueued without displacing anything.
	Enqueued,
	/// Queue was full under `DropNewest`; the incoming item is handed back.
	DroppedNewest(T),
	/// Queue was full under `DropOldest`; the evicted head is handed back.
	ReplacedOldest(T),
}

/// Enqueue failure. The rejected item is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
	/// Queue has been closed.
	#[error("queue closed")]
	Closed,
	/// Storage for the item could not be reserved.
	#[error("queue storage allocation failed")]
	OutOfMemory,
}

/// Thread-safe FIFO shared by many producers and one consumer.
///
/// Implementations synchronize internally; callers never lock around these
/// calls.
pub trait MessageQueue<T>: Send + Sync + 'static {
	/// Pushes one item at the tail.
	fn enqueue(&self, item: T) -> Result<EnqueueOutcome<T>, EnqueueError>;

	/// Pushes one item on behalf of the consumer thread itself.
	///
	/// Must never wait for capacity: only the caller could free it.
	/// Queues without a waiting overflow mode can keep the default.
	fn enqueue_from_consumer(&self, item: T) -> Result<EnqueueOutcome<T>, EnqueueError> {
		self.enqueue(item)
	}

	/// Pops the head item, or `None` if the queue is empty or closed.
	fn dequeue(&self) -> Option<T>;

	/// Number of queued items.
	fn size(&self) -> usize;

	/// Blocks until an item is queued. Returns `false` once the queue is closed.
	fn wait_for_item(&self) -> bool;

	/// Blocks until the queue is empty or closed.
	fn wait_until_empty(&self);

	/// Closes the queue, waking every waiter, and returns the items still queued.
	///
	/// Later calls return an empty vector.
	fn close(&self) -> Vec<T>;
}
