//! Error types for the dispatch runtime.

use thiserror::Error;

/// Invariant violations that terminate the process.
///
/// These are never returned to callers. [`fatal`] logs the error and exits
/// with [`FatalError::exit_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FatalError {
	/// A message was sent without a payload.
	#[error("null message sent")]
	NullPayload,
	/// Storage for an envelope could not be reserved.
	#[error("failed to allocate envelope storage")]
	AllocationFailure,
	/// The queue refused an envelope (closed, or no runtime to accept it).
	#[error("failed to enqueue message")]
	EnqueueFailure,
	/// The queue reported pending items but yielded none.
	#[error("failed to dequeue element: queue reported {size} pending")]
	DequeueInconsistency {
		/// Size the queue reported right before the failed pop.
		size: usize,
	},
}

impl FatalError {
	/// Process exit status used for this error.
	pub const fn exit_code(self) -> i32 {
		match self {
			Self::NullPayload => -3,
			Self::AllocationFailure | Self::EnqueueFailure => -2,
			Self::DequeueInconsistency { .. } => -1,
		}
	}
}

/// Logs `err` and terminates the process with its exit code.
#[cold]
pub fn fatal(err: FatalError) -> ! {
	tracing::error!(error = %err, exit_code = err.exit_code(), "smear.fatal");
	std::process::exit(err.exit_code())
}

/// Recoverable lifecycle misuse.
#[derive(Debug, Error)]
pub enum RuntimeError {
	/// `run` was called on a runtime whose dispatcher is already running.
	#[error("dispatcher is already running")]
	AlreadyRunning,
	/// The runtime has been stopped and cannot be restarted.
	#[error("runtime has been stopped")]
	Stopped,
	/// The dispatcher thread could not be spawned.
	#[error("failed to spawn dispatcher thread: {0}")]
	Spawn(#[from] std::io::Error),
}

/// Errors produced while loading or validating [`crate::RuntimeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
	/// TOML syntax or schema error.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// A bounded queue was configured with zero capacity.
	#[error("queue capacity must be > 0")]
	ZeroCapacity,

	/// The dispatcher thread name was empty.
	#[error("dispatcher thread name must not be empty")]
	EmptyThreadName,
}
