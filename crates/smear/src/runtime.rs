use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::RuntimeConfig;
use crate::dispatcher::{Dispatcher, DispatcherExit};
use crate::error::{ConfigError, FatalError, RuntimeError, fatal};
use crate::idle::IdleTracker;
use crate::mailbox::Mailbox;
use crate::message::{Envelope, Handled, Message};
use crate::queue::{EnqueueError, EnqueueOutcome, MessageQueue};
use crate::spawn::{panic_message, spawn_dispatcher_thread};
use crate::token::{DispatchToken, SequenceClock};

/// Outcome of one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
	/// Message was queued for dispatch.
	Enqueued,
	/// Queue was full under `DropNewest`; this message was dropped unhandled.
	DroppedNewest,
	/// Queue was full under `DropOldest`; the oldest queued message was dropped unhandled.
	ReplacedOldest,
}

/// Lifecycle phase of a [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
	/// Queue exists; sends are accepted but not yet dispatched.
	Initialized,
	/// Dispatcher thread is running.
	Running,
	/// A handler panicked and took the dispatcher down; the queue is closed.
	Faulted,
	/// Dispatcher has been stopped and the queue closed.
	Stopped,
}

/// Result of [`Runtime::stop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
	already_stopped: bool,
	dropped: usize,
	exit: Option<DispatcherExit>,
}

impl StopReport {
	/// True when this call found the runtime already stopped and did nothing.
	pub fn already_stopped(&self) -> bool {
		self.already_stopped
	}

	/// Messages released without being handled: those still queued at stop,
	/// plus any abandoned when a handler panic took the dispatcher down.
	pub fn dropped(&self) -> usize {
		self.dropped
	}

	/// How the dispatcher loop ended, `None` if it never ran or was not joined.
	pub fn exit(&self) -> Option<&DispatcherExit> {
		self.exit.as_ref()
	}
}

/// Snapshot of runtime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
	pub dispatched: u64,
	pub drain_cycles: u64,
	pub overflow_drops: u64,
	pub pending: usize,
	pub queued: usize,
}

#[derive(Debug, Default)]
pub(crate) struct DispatchCounters {
	pub dispatched: AtomicU64,
	pub drain_cycles: AtomicU64,
	pub overflow_drops: AtomicU64,
	pub abandoned: AtomicUsize,
}

/// State shared between producers and the dispatcher.
pub(crate) struct Shared<Q> {
	pub queue: Q,
	pub idle: IdleTracker,
	pub clock: SequenceClock,
	pub counters: DispatchCounters,
	dispatcher: OnceLock<ThreadId>,
	faulted: AtomicBool,
}

impl<Q> Shared<Q>
where
	Q: MessageQueue<Envelope>,
{
	pub fn new(queue: Q) -> Self {
		Self {
			queue,
			idle: IdleTracker::new(),
			clock: SequenceClock::new(),
			counters: DispatchCounters::default(),
			dispatcher: OnceLock::new(),
			faulted: AtomicBool::new(false),
		}
	}

	/// Records the calling thread as the dispatcher.
	pub fn bind_dispatcher(&self) {
		let _ = self.dispatcher.set(std::thread::current().id());
	}

	/// True when called from a handler, i.e. on the dispatcher thread.
	pub fn on_dispatcher(&self) -> bool {
		self.dispatcher.get().is_some_and(|id| *id == std::thread::current().id())
	}

	/// Idle as seen by the caller; a handler does not count its own message.
	pub fn is_idle(&self) -> bool {
		if self.on_dispatcher() {
			self.idle.is_idle_but_current()
		} else {
			self.idle.is_idle()
		}
	}

	/// Whether an idle wait can block. A handler waiting on the dispatcher
	/// would wait on itself.
	fn idle_wait_allowed(&self) -> bool {
		if self.on_dispatcher() {
			tracing::debug!(pending = self.idle.pending(), "smear.wait_for_idle.from_handler");
			return false;
		}
		true
	}

	pub fn is_faulted(&self) -> bool {
		self.faulted.load(Ordering::Acquire)
	}

	/// Shuts the queue after a handler unwound the dispatcher.
	///
	/// Queued envelopes are released unhandled and later sends become fatal,
	/// so idle waiters never see work that nothing will drain.
	pub fn fault(&self) {
		self.faulted.store(true, Ordering::Release);
		let remaining = self.queue.close();
		let abandoned = remaining.len();
		self.counters.abandoned.fetch_add(abandoned, Ordering::Relaxed);
		drop(remaining);
		self.idle.abandon(abandoned);
		self.idle.close();
		tracing::error!(abandoned, "smear.dispatcher.faulted");
	}

	pub fn send<M: Message>(&self, message: M) -> SendOutcome {
		let envelope = Envelope::new(self.clock.next(), message);
		let seq = envelope.seq();

		// Pending is raised before the push so an idle waiter can never
		// observe zero while this envelope sits in the queue.
		self.idle.begin();
		let result = if self.on_dispatcher() {
			self.queue.enqueue_from_consumer(envelope)
		} else {
			self.queue.enqueue(envelope)
		};
		match result {
			Ok(EnqueueOutcome::Enqueued) => {
				tracing::trace!(seq, "smear.send");
				SendOutcome::Enqueued
			}
			Ok(EnqueueOutcome::DroppedNewest(dropped)) => {
				self.discard(dropped);
				SendOutcome::DroppedNewest
			}
			Ok(EnqueueOutcome::ReplacedOldest(evicted)) => {
				self.discard(evicted);
				SendOutcome::ReplacedOldest
			}
			Err(EnqueueError::Closed) => fatal(FatalError::EnqueueFailure),
			Err(EnqueueError::OutOfMemory) => fatal(FatalError::AllocationFailure),
		}
	}

	fn discard(&self, envelope: Envelope) {
		let count = self.counters.overflow_drops.fetch_add(1, Ordering::Relaxed);
		if count % 1024 == 0 {
			tracing::warn!(drops = count + 1, seq = envelope.seq(), "smear queue full, dropping message");
		}
		drop(envelope);
		self.idle.finish();
	}
}

enum Lifecycle {
	Initialized,
	Running(JoinHandle<DispatcherExit>),
	Stopped,
}

/// Message dispatch runtime: one queue, one dispatcher thread.
///
/// Any number of threads may send concurrently, directly or through a
/// cloned [`MessageSender`]. Handlers run one at a time on the dispatcher
/// thread in queue order.
pub struct Runtime<Q = Mailbox<Envelope>>
where
	Q: MessageQueue<Envelope>,
{
	thread_name: String,
	shared: Arc<Shared<Q>>,
	token: DispatchToken,
	lifecycle: Mutex<Lifecycle>,
}

impl Default for Runtime {
	fn default() -> Self {
		Self::with_queue(RuntimeConfig::default(), Mailbox::unbounded())
	}
}

impl Runtime {
	/// Creates a runtime with an empty [`Mailbox`] built from `config`.
	pub fn new(config: RuntimeConfig) -> Result<Self, ConfigError> {
		config.validate()?;
		let queue = Mailbox::from_config(&config.queue);
		Ok(Self::with_queue(config, queue))
	}
}

impl<Q> Runtime<Q>
where
	Q: MessageQueue<Envelope>,
{
	/// Creates a runtime over a caller-supplied queue.
	///
	/// Only `config.thread_name` is used; queue sizing belongs to `queue`.
	pub fn with_queue(config: RuntimeConfig, queue: Q) -> Self {
		Self {
			thread_name: config.thread_name,
			shared: Arc::new(Shared::new(queue)),
			token: DispatchToken::new(),
			lifecycle: Mutex::new(Lifecycle::Initialized),
		}
	}

	/// Current lifecycle phase.
	pub fn state(&self) -> RuntimeState {
		match &*self.lifecycle.lock() {
			Lifecycle::Initialized => RuntimeState::Initialized,
			Lifecycle::Running(_) if self.shared.is_faulted() => RuntimeState::Faulted,
			Lifecycle::Running(_) => RuntimeState::Running,
			Lifecycle::Stopped => RuntimeState::Stopped,
		}
	}

	/// Starts the dispatcher thread.
	pub fn run(&self) -> Result<(), RuntimeError> {
		let mut lifecycle = self.lifecycle.lock();
		match &*lifecycle {
			Lifecycle::Initialized => {}
			Lifecycle::Running(_) => return Err(RuntimeError::AlreadyRunning),
			Lifecycle::Stopped => return Err(RuntimeError::Stopped),
		}

		let dispatcher = Dispatcher::new(Arc::clone(&self.shared), self.token.clone());
		let handle = spawn_dispatcher_thread(self.thread_name.clone(), move || dispatcher.run())?;
		*lifecycle = Lifecycle::Running(handle);
		tracing::debug!(thread = %self.thread_name, queued = self.shared.queue.size(), "smear.run");
		Ok(())
	}

	/// Queues `message` for the dispatcher.
	///
	/// Terminates the process if the runtime has been stopped or faulted, or
	/// queue storage cannot be allocated. A handler sending into its own full
	/// `Block` queue is admitted past capacity rather than waiting on itself.
	pub fn send<M: Message>(&self, message: M) -> SendOutcome {
		self.shared.send(message)
	}

	/// Queues `payload` to be handed to `handler` on the dispatcher thread.
	pub fn send_with<P, H>(&self, payload: P, handler: H) -> SendOutcome
	where
		P: Send + 'static,
		H: FnOnce(P) + Send + 'static,
	{
		self.shared.send(Handled::new(payload, handler))
	}

	/// Returns a cloneable send port sharing this runtime's queue.
	pub fn sender(&self) -> MessageSender<Q> {
		MessageSender {
			shared: Arc::clone(&self.shared),
		}
	}

	/// Returns true when no message is queued or being handled, or the runtime is stopped or faulted.
	///
	/// Inside a handler, the message being handled is not counted.
	pub fn is_idle(&self) -> bool {
		self.shared.is_idle()
	}

	/// Blocks until every message sent so far has been handled.
	///
	/// Also returns once the runtime is stopped or a handler has unwound the
	/// dispatcher. Messages sent before [`Runtime::run`] keep this blocked
	/// until the dispatcher starts.
	///
	/// Called from inside a handler, returns at once: nothing queued can be
	/// handled until that handler returns.
	pub fn wait_for_idle(&self) {
		if self.shared.idle_wait_allowed() {
			self.shared.idle.wait();
		}
	}

	/// Like [`Runtime::wait_for_idle`], giving up after `timeout`. Returns whether idle was reached.
	///
	/// Inside a handler this does not wait and reports [`Runtime::is_idle`].
	pub fn wait_for_idle_timeout(&self, timeout: Duration) -> bool {
		if !self.shared.idle_wait_allowed() {
			return self.shared.is_idle();
		}
		self.shared.idle.wait_timeout(timeout)
	}

	/// Async form of [`Runtime::wait_for_idle`].
	pub async fn wait_for_idle_async(&self) {
		if self.shared.idle_wait_allowed() {
			self.shared.idle.wait_async().await;
		}
	}

	/// Snapshot of dispatch counters.
	pub fn stats(&self) -> RuntimeStats {
		let counters = &self.shared.counters;
		RuntimeStats {
			dispatched: counters.dispatched.load(Ordering::Relaxed),
			drain_cycles: counters.drain_cycles.load(Ordering::Relaxed),
			overflow_drops: counters.overflow_drops.load(Ordering::Relaxed),
			pending: self.shared.idle.pending(),
			queued: self.shared.queue.size(),
		}
	}

	/// Stops the dispatcher and closes the queue.
	///
	/// A handler already running finishes first; messages still queued are
	/// released without being handled. Must not race with producers still
	/// sending: a send after stop is fatal. Calling stop again is a no-op.
	pub fn stop(&self) -> StopReport {
		let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
		if matches!(previous, Lifecycle::Stopped) {
			return StopReport {
				already_stopped: true,
				dropped: 0,
				exit: None,
			};
		}

		// Cancel before closing; the dispatcher relies on this order.
		self.token.cancel();
		let remaining = self.shared.queue.close();

		let exit = match previous {
			Lifecycle::Running(handle) => self.join(handle),
			Lifecycle::Initialized | Lifecycle::Stopped => None,
		};

		let unhandled = remaining.len();
		drop(remaining);
		self.shared.idle.abandon(unhandled);
		self.shared.idle.close();

		let dropped = unhandled + self.shared.counters.abandoned.load(Ordering::Relaxed);
		if dropped > 0 {
			tracing::warn!(dropped, "smear.stop.dropped_unhandled");
		}

		tracing::debug!(thread = %self.thread_name, dropped, exit = ?exit, "smear.stop");
		StopReport {
			already_stopped: false,
			dropped,
			exit,
		}
	}

	fn join(&self, handle: JoinHandle<DispatcherExit>) -> Option<DispatcherExit> {
		if handle.thread().id() == std::thread::current().id() {
			// Stop issued from inside a handler: the loop exits at its next cancellation check.
			return None;
		}
		match handle.join() {
			Ok(exit) => Some(exit),
			Err(payload) => {
				let message = panic_message(payload.as_ref());
				tracing::error!(thread = %self.thread_name, panic = ?message, "smear.dispatcher.panicked");
				Some(DispatcherExit::Panicked(message))
			}
		}
	}
}

impl<Q> Drop for Runtime<Q>
where
	Q: MessageQueue<Envelope>,
{
	fn drop(&mut self) {
		if matches!(self.lifecycle.get_mut(), Lifecycle::Stopped) {
			return;
		}
		self.token.cancel();
		drop(self.shared.queue.close());
		self.shared.idle.close();
	}
}

/// Cloneable send port for producers that do not own the [`Runtime`].
pub struct MessageSender<Q = Mailbox<Envelope>>
where
	Q: MessageQueue<Envelope>,
{
	shared: Arc<Shared<Q>>,
}

impl<Q> Clone for MessageSender<Q>
where
	Q: MessageQueue<Envelope>,
{
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<Q> MessageSender<Q>
where
	Q: MessageQueue<Envelope>,
{
	/// Queues `message` for the dispatcher. See [`Runtime::send`].
	pub fn send<M: Message>(&self, message: M) -> SendOutcome {
		self.shared.send(message)
	}

	/// Queues `payload` to be handed to `handler`. See [`Runtime::send_with`].
	pub fn send_with<P, H>(&self, payload: P, handler: H) -> SendOutcome
	where
		P: Send + 'static,
		H: FnOnce(P) + Send + 'static,
	{
		self.shared.send(Handled::new(payload, handler))
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use pretty_assertions::assert_eq;

	use super::*;
	use crate::config::{OverflowPolicy, QueueConfig};

	fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) + Clone + Send + 'static) {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		(seen, move |v| sink.lock().push(v))
	}

	#[test]
	fn lifecycle_transitions() {
		let _ = tracing_subscriber::fmt().with_test_writer().try_init();
		let rt = Runtime::default();
		assert_eq!(rt.state(), RuntimeState::Initialized);
		rt.run().unwrap();
		assert_eq!(rt.state(), RuntimeState::Running);
		assert!(matches!(rt.run(), Err(RuntimeError::AlreadyRunning)));

		let report = rt.stop();
		assert!(!report.already_stopped());
		assert_eq!(report.exit(), Some(&DispatcherExit::Cancelled));
		assert_eq!(rt.state(), RuntimeState::Stopped);
		assert!(matches!(rt.run(), Err(RuntimeError::Stopped)));
	}

	#[test]
	fn second_stop_is_a_no_op() {
		let rt = Runtime::default();
		rt.run().unwrap();
		assert!(!rt.stop().already_stopped());
		let again = rt.stop();
		assert!(again.already_stopped());
		assert_eq!(again.dropped(), 0);
	}

	#[test]
	fn sends_before_run_are_dispatched_once_running() {
		let rt = Runtime::default();
		let (seen, rec) = recorder();
		for i in 0..3 {
			let rec = rec.clone();
			rt.send_with(i, rec);
		}
		assert!(!rt.is_idle());
		assert!(!rt.wait_for_idle_timeout(Duration::from_millis(10)));

		rt.run().unwrap();
		assert!(rt.wait_for_idle_timeout(Duration::from_secs(2)));
		assert_eq!(*seen.lock(), vec![0, 1, 2]);
		rt.stop();
	}

	#[test]
	fn stop_without_run_drops_queued_messages() {
		let rt = Runtime::default();
		let handled = Arc::new(AtomicUsize::new(0));
		for _ in 0..4 {
			let handled = Arc::clone(&handled);
			rt.send_with((), move |()| {
				handled.fetch_add(1, Ordering::SeqCst);
			});
		}

		let report = rt.stop();
		assert_eq!(report.dropped(), 4);
		assert_eq!(report.exit(), None);
		assert_eq!(handled.load(Ordering::SeqCst), 0);
		assert!(rt.wait_for_idle_timeout(Duration::from_millis(10)), "stopped runtime must not block waiters");
	}

	#[test]
	fn stats_track_dispatch() {
		let rt = Runtime::default();
		rt.run().unwrap();
		for i in 0..10u32 {
			rt.send_with(i, |_| {});
		}
		rt.wait_for_idle();

		let stats = rt.stats();
		assert_eq!(stats.dispatched, 10);
		assert_eq!(stats.pending, 0);
		assert_eq!(stats.queued, 0);
		rt.stop();
	}

	#[test]
	fn drop_newest_reports_and_settles_pending() {
		let config = RuntimeConfig::default().queue(QueueConfig::bounded(2, OverflowPolicy::DropNewest));
		let rt = Runtime::new(config).unwrap();
		let (seen, rec) = recorder();

		assert_eq!(rt.send_with(1, rec.clone()), SendOutcome::Enqueued);
		assert_eq!(rt.send_with(2, rec.clone()), SendOutcome::Enqueued);
		assert_eq!(rt.send_with(3, rec.clone()), SendOutcome::DroppedNewest);
		assert_eq!(rt.stats().pending, 2);
		assert_eq!(rt.stats().overflow_drops, 1);

		rt.run().unwrap();
		rt.wait_for_idle();
		assert_eq!(*seen.lock(), vec![1, 2]);
		rt.stop();
	}

	#[test]
	fn drop_oldest_evicts_head() {
		let config = RuntimeConfig::default().queue(QueueConfig::bounded(2, OverflowPolicy::DropOldest));
		let rt = Runtime::new(config).unwrap();
		let (seen, rec) = recorder();

		rt.send_with(1, rec.clone());
		rt.send_with(2, rec.clone());
		assert_eq!(rt.send_with(3, rec.clone()), SendOutcome::ReplacedOldest);

		rt.run().unwrap();
		rt.wait_for_idle();
		assert_eq!(*seen.lock(), vec![2, 3]);
		rt.stop();
	}

	#[test]
	fn invalid_config_is_rejected() {
		let config = RuntimeConfig::default().thread_name("");
		assert!(matches!(Runtime::new(config), Err(ConfigError::EmptyThreadName)));
	}

	#[test]
	fn stop_from_inside_handler_does_not_self_join() {
		let rt = Arc::new(Runtime::default());
		rt.run().unwrap();

		let (tx, rx) = std::sync::mpsc::channel();
		let inner = Arc::clone(&rt);
		rt.send_with((), move |()| {
			let _ = tx.send(inner.stop());
		});

		let report = rx.recv_timeout(Duration::from_secs(2)).expect("handler should run");
		assert!(!report.already_stopped());
		assert_eq!(report.exit(), None);
		assert_eq!(rt.state(), RuntimeState::Stopped);
	}

	#[test]
	fn wait_for_idle_inside_handler_does_not_wait_on_itself() {
		let rt = Arc::new(Runtime::default());
		rt.run().unwrap();

		let (tx, rx) = std::sync::mpsc::channel();
		let inner = Arc::clone(&rt);
		rt.send_with((), move |()| {
			inner.wait_for_idle();
			let _ = tx.send((inner.is_idle(), inner.wait_for_idle_timeout(Duration::from_secs(5))));
		});

		let seen = rx.recv_timeout(Duration::from_secs(2)).expect("handler must not block on its own message");
		assert_eq!(seen, (true, true));
		assert!(rt.wait_for_idle_timeout(Duration::from_secs(2)));
		rt.stop();
	}

	#[test]
	fn idle_inside_handler_still_sees_queued_work() {
		let rt = Arc::new(Runtime::default());
		let (seen, rec) = recorder();
		let (tx, rx) = std::sync::mpsc::channel();
		let inner = Arc::clone(&rt);
		rt.send_with((), move |()| {
			let _ = tx.send(inner.wait_for_idle_timeout(Duration::from_secs(5)));
		});
		rt.send_with(7, rec);
		rt.run().unwrap();

		assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(false));
		assert!(rt.wait_for_idle_timeout(Duration::from_secs(2)));
		assert_eq!(*seen.lock(), vec![7]);
		rt.stop();
	}

	#[test]
	fn handler_send_into_full_blocking_queue_is_admitted() {
		let config = RuntimeConfig::default().queue(QueueConfig::bounded(1, OverflowPolicy::Block));
		let rt = Runtime::new(config).unwrap();
		rt.run().unwrap();

		let (seen, rec) = recorder();
		let (tx, rx) = std::sync::mpsc::channel();
		let sender = rt.sender();
		rt.send_with((), move |()| {
			let outcomes = [sender.send_with(1, rec.clone()), sender.send_with(2, rec)];
			let _ = tx.send(outcomes);
		});

		let outcomes = rx.recv_timeout(Duration::from_secs(2)).expect("handler must not block on its own queue");
		assert_eq!(outcomes, [SendOutcome::Enqueued, SendOutcome::Enqueued]);
		assert!(rt.wait_for_idle_timeout(Duration::from_secs(2)));
		assert_eq!(*seen.lock(), vec![1, 2]);
		rt.stop();
	}

	#[test]
	fn handler_panic_faults_runtime_and_abandons_queue() {
		let rt = Runtime::default();
		rt.run().unwrap();

		let (release, gate) = std::sync::mpsc::channel::<()>();
		rt.send_with((), move |()| {
			let _ = gate.recv();
			panic!("handler fault");
		});
		let (seen, rec) = recorder();
		for i in 0..3 {
			rt.send_with(i, rec.clone());
		}
		assert!(!rt.is_idle());
		release.send(()).unwrap();

		assert!(rt.wait_for_idle_timeout(Duration::from_secs(2)));
		assert_eq!(rt.state(), RuntimeState::Faulted);
		let stats = rt.stats();
		assert_eq!((stats.queued, stats.pending), (0, 0));
		assert!(seen.lock().is_empty());

		let report = rt.stop();
		assert_eq!(report.dropped(), 3);
		assert_eq!(report.exit(), Some(&DispatcherExit::Panicked(Some("handler fault".to_owned()))));
		assert_eq!(rt.state(), RuntimeState::Stopped);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn async_wait_for_idle() {
		let rt = Runtime::default();
		rt.run().unwrap();
		let (seen, rec) = recorder();
		for i in 0..50 {
			rt.send_with(i, rec.clone());
		}

		tokio::time::timeout(Duration::from_secs(2), rt.wait_for_idle_async())
			.await
			.expect("idle wait should finish");
		assert_eq!(seen.lock().len(), 50);
		rt.stop();
	}
}
