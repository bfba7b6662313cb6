//! Message and envelope types.

use std::fmt;

/// A unit of work handled on the dispatcher thread.
///
/// `handle` consumes the message; it runs exactly once, synchronously,
/// and never concurrently with another handler of the same runtime.
pub trait Message: Send + 'static {
	fn handle(self);
}

/// Payload paired with the handler that consumes it.
pub struct Handled<P, H> {
	payload: P,
	handler: H,
}

impl<P, H> Handled<P, H>
where
	P: Send + 'static,
	H: FnOnce(P) + Send + 'static,
{
	pub fn new(payload: P, handler: H) -> Self {
		Self { payload, handler }
	}
}

impl<P, H> Message for Handled<P, H>
where
	P: Send + 'static,
	H: FnOnce(P) + Send + 'static,
{
	fn handle(self) {
		(self.handler)(self.payload)
	}
}

/// Object-safe form of [`Message`] stored inside an [`Envelope`].
trait Dispatch: Send {
	fn dispatch(self: Box<Self>);
	fn type_name(&self) -> &'static str;
}

impl<M: Message> Dispatch for M {
	fn dispatch(self: Box<Self>) {
		(*self).handle();
	}

	fn type_name(&self) -> &'static str {
		std::any::type_name::<M>()
	}
}

/// Queued unit of work: one message plus its send sequence number.
pub struct Envelope {
	seq: u64,
	message: Box<dyn Dispatch>,
}

impl Envelope {
	pub(crate) fn new<M: Message>(seq: u64, message: M) -> Self {
		Self {
			seq,
			message: Box::new(message),
		}
	}

	/// Sequence number assigned at send time.
	pub fn seq(&self) -> u64 {
		self.seq
	}

	/// Type name of the wrapped message, for diagnostics.
	pub fn type_name(&self) -> &'static str {
		self.message.type_name()
	}

	/// Runs the handler, consuming the envelope.
	pub(crate) fn dispatch(self) {
		self.message.dispatch();
	}
}

impl fmt::Debug for Envelope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Envelope").field("seq", &self.seq).field("message", &self.type_name()).finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	struct Bump(Arc<AtomicUsize>);

	impl Message for Bump {
		fn handle(self) {
			self.0.fetch_add(1, Ordering::SeqCst);
		}
	}

	#[test]
	fn envelope_dispatches_trait_message() {
		let hits = Arc::new(AtomicUsize::new(0));
		let envelope = Envelope::new(7, Bump(Arc::clone(&hits)));
		assert_eq!(envelope.seq(), 7);
		assert!(envelope.type_name().ends_with("Bump"), "got: {}", envelope.type_name());
		envelope.dispatch();
		assert_eq!(hits.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn handled_passes_payload_to_handler() {
		let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		Envelope::new(0, Handled::new(String::from("ping"), move |p: String| sink.lock().push(p))).dispatch();
		assert_eq!(*seen.lock(), vec!["ping".to_string()]);
	}

	#[test]
	fn dropping_envelope_releases_payload_without_handling() {
		let payload = Arc::new(());
		let hits = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&hits);
		let envelope = Envelope::new(
			1,
			Handled::new(Arc::clone(&payload), move |_| {
				counter.fetch_add(1, Ordering::SeqCst);
			}),
		);
		assert_eq!(Arc::strong_count(&payload), 2);
		drop(envelope);
		assert_eq!(Arc::strong_count(&payload), 1);
		assert_eq!(hits.load(Ordering::SeqCst), 0);
	}
}
