//! In-flight accounting behind `wait_for_idle`.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct IdleState {
	pending: usize,
	closed: bool,
}

/// Counts messages that are queued or being handled.
///
/// Senders call [`IdleTracker::begin`] before enqueueing and the dispatcher
/// calls [`IdleTracker::finish`] after the handler returns, so a zero count
/// means nothing is queued and nothing is running. Once closed, waiters
/// return immediately since nothing will drain the remainder.
#[derive(Debug, Default)]
pub(crate) struct IdleTracker {
	state: Mutex<IdleState>,
	idle: Condvar,
	idle_async: Notify,
}

impl IdleTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Marks one message as pending.
	pub fn begin(&self) {
		let mut state = self.state.lock();
		state.pending = state.pending.wrapping_add(1);
	}

	/// Marks one message as handled or discarded.
	pub fn finish(&self) {
		let mut state = self.state.lock();
		debug_assert!(state.pending > 0, "idle tracker underflow");
		state.pending = state.pending.saturating_sub(1);
		if state.pending == 0 {
			drop(state);
			self.wake_all();
		}
	}

	/// Settles `count` messages released without being handled.
	pub fn abandon(&self, count: usize) {
		if count == 0 {
			return;
		}
		let mut state = self.state.lock();
		debug_assert!(state.pending >= count, "idle tracker underflow");
		state.pending = state.pending.saturating_sub(count);
		if state.pending == 0 {
			drop(state);
			self.wake_all();
		}
	}

	/// Releases every waiter for good.
	pub fn close(&self) {
		self.state.lock().closed = true;
		self.wake_all();
	}

	pub fn pending(&self) -> usize {
		self.state.lock().pending
	}

	pub fn is_idle(&self) -> bool {
		let state = self.state.lock();
		state.pending == 0 || state.closed
	}

	/// Idle apart from the one message whose handler is asking.
	pub fn is_idle_but_current(&self) -> bool {
		let state = self.state.lock();
		state.pending <= 1 || state.closed
	}

	/// Blocks until idle or closed.
	pub fn wait(&self) {
		let mut state = self.state.lock();
		while state.pending > 0 && !state.closed {
			self.idle.wait(&mut state);
		}
	}

	/// Blocks until idle or closed, at most `timeout`. Returns whether idle was reached.
	pub fn wait_timeout(&self, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		let mut state = self.state.lock();
		while state.pending > 0 && !state.closed {
			if self.idle.wait_until(&mut state, deadline).timed_out() {
				return state.pending == 0 || state.closed;
			}
		}
		true
	}

	/// Async form of [`IdleTracker::wait`].
	pub async fn wait_async(&self) {
		loop {
			// Register before checking to avoid a lost wakeup between the check and the await.
			let notified = self.idle_async.notified();
			if self.is_idle() {
				return;
			}
			notified.await;
		}
	}

	fn wake_all(&self) {
		self.idle.notify_all();
		self.idle_async.notify_waiters();
	}
}
