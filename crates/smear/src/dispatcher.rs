use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::error::{FatalError, fatal};
use crate::message::Envelope;
use crate::queue::MessageQueue;
use crate::runtime::Shared;
use crate::token::DispatchToken;

/// Why the dispatcher loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherExit {
	/// Stop was observed at the top of the drain loop.
	Cancelled,
	/// The queue was closed while the dispatcher waited for work.
	QueueClosed,
	/// A handler panicked and unwound the dispatcher thread.
	Panicked(Option<String>),
}

/// The single consumer: the only place handlers are ever invoked.
pub(crate) struct Dispatcher<Q> {
	shared: Arc<Shared<Q>>,
	token: DispatchToken,
}

impl<Q> Dispatcher<Q>
where
	Q: MessageQueue<Envelope>,
{
	pub fn new(shared: Arc<Shared<Q>>, token: DispatchToken) -> Self {
		Self { shared, token }
	}

	/// Runs until cancelled or the queue closes.
	pub fn run(self) -> DispatcherExit {
		self.shared.bind_dispatcher();
		tracing::debug!("smear.dispatcher.start");
		let exit = loop {
			if let Some(exit) = self.drain() {
				break exit;
			}
			self.shared.counters.drain_cycles.fetch_add(1, Ordering::Relaxed);
			tracing::trace!(pending = self.shared.idle.pending(), "smear.dispatcher.idle");

			// Sleep until a producer enqueues; no polling.
			if !self.shared.queue.wait_for_item() {
				break if self.token.is_cancelled() {
					DispatcherExit::Cancelled
				} else {
					DispatcherExit::QueueClosed
				};
			}
		};
		tracing::debug!(
			exit = ?exit,
			dispatched = self.shared.counters.dispatched.load(Ordering::Relaxed),
			"smear.dispatcher.exit"
		);
		exit
	}

	/// Pops and handles envelopes until the queue reports empty.
	///
	/// The cancellation check heading each iteration is the loop's only
	/// cancellation point: a stop never lands mid-handler or between a pop
	/// and the release of the popped envelope.
	fn drain(&self) -> Option<DispatcherExit> {
		loop {
			if self.token.is_cancelled() {
				return Some(DispatcherExit::Cancelled);
			}
			let size = self.shared.queue.size();
			if size == 0 {
				return None;
			}
			let Some(envelope) = self.shared.queue.dequeue() else {
				// Stop cancels before closing, so a close racing this pop shows up here.
				if self.token.is_cancelled() {
					return Some(DispatcherExit::Cancelled);
				}
				fatal(FatalError::DequeueInconsistency { size });
			};
			self.dispatch(envelope);
		}
	}

	fn dispatch(&self, envelope: Envelope) {
		tracing::trace!(seq = envelope.seq(), message = envelope.type_name(), "smear.dispatch");
		let _in_flight = InFlight { shared: &self.shared };
		envelope.dispatch();
		self.shared.counters.dispatched.fetch_add(1, Ordering::Relaxed);
	}
}

/// Marks the current envelope finished once its handler returns or unwinds.
struct InFlight<'a, Q: MessageQueue<Envelope>> {
	shared: &'a Shared<Q>,
}

impl<Q: MessageQueue<Envelope>> Drop for InFlight<'_, Q> {
	fn drop(&mut self) {
		self.shared.idle.finish();
		if std::thread::panicking() {
			// The dispatcher is gone; nothing will drain what is left.
			self.shared.fault();
		}
	}
}
