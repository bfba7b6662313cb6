use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::config::{OverflowPolicy, QueueConfig};
use crate::queue::{EnqueueError, EnqueueOutcome, MessageQueue};

struct MailboxState<T> {
	queue: VecDeque<T>,
	closed: bool,
}

/// Default [`MessageQueue`]: a mutex-guarded deque with condvar wakeups.
///
/// Unbounded unless built with a capacity, in which case `policy` decides
/// what a send into a full mailbox does.
pub struct Mailbox<T> {
	capacity: Option<usize>,
	policy: OverflowPolicy,
	state: Mutex<MailboxState<T>>,
	notify_recv: Condvar,
	notify_send: Condvar,
	notify_empty: Condvar,
}

impl<T> Default for Mailbox<T> {
	fn default() -> Self {
		Self::unbounded()
	}
}

impl<T> Mailbox<T> {
	/// Creates an unbounded mailbox.
	pub fn unbounded() -> Self {
		Self::build(None, OverflowPolicy::Block)
	}

	/// Creates a bounded mailbox.
	///
	/// # Panics
	///
	/// Panics if `capacity` is zero.
	pub fn bounded(capacity: usize, policy: OverflowPolicy) -> Self {
		assert!(capacity > 0, "mailbox capacity must be > 0");
		Self::build(Some(capacity), policy)
	}

	/// Creates a mailbox from queue configuration.
	///
	/// # Panics
	///
	/// Panics if the configured capacity is zero.
	pub fn from_config(config: &QueueConfig) -> Self {
		match config.capacity {
			Some(capacity) => Self::bounded(capacity, config.overflow),
			None => Self::unbounded(),
		}
	}

	fn build(capacity: Option<usize>, policy: OverflowPolicy) -> Self {
		Self {
			capacity,
			policy,
			state: Mutex::new(MailboxState {
				queue: VecDeque::with_capacity(capacity.unwrap_or(0)),
				closed: false,
			}),
			notify_recv: Condvar::new(),
			notify_send: Condvar::new(),
			notify_empty: Condvar::new(),
		}
	}

	/// Returns queue capacity, `None` when unbounded.
	pub fn capacity(&self) -> Option<usize> {
		self.capacity
	}

	/// Returns overflow policy.
	pub fn policy(&self) -> OverflowPolicy {
		self.policy
	}

	/// Returns whether the mailbox has been closed.
	pub fn is_closed(&self) -> bool {
		self.state.lock().closed
	}

	fn is_full(&self, state: &MailboxState<T>) -> bool {
		self.capacity.is_some_and(|cap| state.queue.len() >= cap)
	}

	fn push(&self, state: &mut MailboxState<T>, item: T) -> Result<(), EnqueueError> {
		state.queue.try_reserve(1).map_err(|_| EnqueueError::OutOfMemory)?;
		state.queue.push_back(item);
		self.notify_recv.notify_one();
		Ok(())
	}
}

impl<T: Send + 'static> MessageQueue<T> for Mailbox<T> {
	/// Enqueue honoring policy (`Block` waits for capacity).
	fn enqueue(&self, item: T) -> Result<EnqueueOutcome<T>, EnqueueError> {
		let mut state = self.state.lock();
		if state.closed {
			return Err(EnqueueError::Closed);
		}
		if !self.is_full(&state) {
			self.push(&mut state, item)?;
			return Ok(EnqueueOutcome::Enqueued);
		}

		match self.policy {
			OverflowPolicy::Block => {
				while self.is_full(&state) && !state.closed {
					self.notify_send.wait(&mut state);
				}
				if state.closed {
					return Err(EnqueueError::Closed);
				}
				self.push(&mut state, item)?;
				Ok(EnqueueOutcome::Enqueued)
			}
			OverflowPolicy::DropNewest => Ok(EnqueueOutcome::DroppedNewest(item)),
			OverflowPolicy::DropOldest => {
				let Some(oldest) = state.queue.pop_front() else {
					// Capacity is never zero, so a full mailbox has a head.
					unreachable!("full mailbox has no head")
				};
				state.queue.push_back(item);
				self.notify_recv.notify_one();
				Ok(EnqueueOutcome::ReplacedOldest(oldest))
			}
		}
	}

	/// Under `Block`, admits the item past capacity instead of waiting.
	fn enqueue_from_consumer(&self, item: T) -> Result<EnqueueOutcome<T>, EnqueueError> {
		if self.policy != OverflowPolicy::Block {
			return self.enqueue(item);
		}
		let mut state = self.state.lock();
		if state.closed {
			return Err(EnqueueError::Closed);
		}
		self.push(&mut state, item)?;
		Ok(EnqueueOutcome::Enqueued)
	}

	fn dequeue(&self) -> Option<T> {
		let mut state = self.state.lock();
		if state.closed {
			return None;
		}
		let item = state.queue.pop_front()?;
		let drained = state.queue.is_empty();
		drop(state);
		self.notify_send.notify_one();
		if drained {
			self.notify_empty.notify_all();
		}
		Some(item)
	}

	fn size(&self) -> usize {
		self.state.lock().queue.len()
	}

	fn wait_for_item(&self) -> bool {
		let mut state = self.state.lock();
		loop {
			if state.closed {
				return false;
			}
			if !state.queue.is_empty() {
				return true;
			}
			self.notify_recv.wait(&mut state);
		}
	}

	fn wait_until_empty(&self) {
		let mut state = self.state.lock();
		while !state.queue.is_empty() && !state.closed {
			self.notify_empty.wait(&mut state);
		}
	}

	fn close(&self) -> Vec<T> {
		let mut state = self.state.lock();
		state.closed = true;
		let remaining: Vec<T> = state.queue.drain(..).collect();
		drop(state);
		self.notify_recv.notify_all();
		self.notify_send.notify_all();
		self.notify_empty.notify_all();
		remaining
	}
}
