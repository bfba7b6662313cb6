use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Hands out envelope sequence numbers.
///
/// The number travels with the envelope into the `smear.send` and
/// `smear.dispatch` trace events, so one message can be followed from its
/// producer to its handler. Numbers start at 1 and only order sends that
/// one producer made; they say nothing about dispatch order across threads.
#[derive(Debug, Default)]
pub(crate) struct SequenceClock {
	issued: AtomicU64,
}

impl SequenceClock {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn next(&self) -> u64 {
		self.issued.fetch_add(1, Ordering::Relaxed) + 1
	}
}

/// Cooperative stop signal for the dispatcher.
///
/// Checked only at the top of the drain loop, never while a handler runs.
#[derive(Debug, Clone, Default)]
pub(crate) struct DispatchToken {
	cancel: CancellationToken,
}

impl DispatchToken {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns true when cancellation is requested.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Requests cancellation.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sequence_numbers_are_unique_across_producers() {
		let clock = std::sync::Arc::new(SequenceClock::new());
		let producers: Vec<_> = (0..4)
			.map(|_| {
				let clock = std::sync::Arc::clone(&clock);
				std::thread::spawn(move || (0..100).map(|_| clock.next()).collect::<Vec<_>>())
			})
			.collect();

		let mut seen: Vec<u64> = producers.into_iter().flat_map(|p| p.join().unwrap()).collect();
		seen.sort_unstable();
		assert_eq!(seen, (1..=400).collect::<Vec<_>>());
	}

	#[test]
	fn cancel_is_visible_through_clones() {
		let token = DispatchToken::new();
		let observer = token.clone();
		assert!(!observer.is_cancelled());
		token.cancel();
		assert!(observer.is_cancelled());
	}
}
