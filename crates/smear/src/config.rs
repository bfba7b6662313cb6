//! Runtime configuration.

use serde::Deserialize;

use crate::error::ConfigError;

/// Default dispatcher thread name.
const DEFAULT_THREAD_NAME: &str = "smear-dispatcher";

/// Behavior of a bounded queue when a send finds it full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
	/// Block the sender until the dispatcher frees capacity.
	#[default]
	Block,
	/// Hand the incoming message back unqueued.
	DropNewest,
	/// Evict the oldest queued message to make room.
	DropOldest,
}

/// Queue sizing and overflow behavior.
///
/// `capacity = None` means unbounded; the overflow policy is then unused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
	pub capacity: Option<usize>,
	pub overflow: OverflowPolicy,
}

impl QueueConfig {
	/// Unbounded queue; `send` never waits for capacity.
	pub const fn unbounded() -> Self {
		Self {
			capacity: None,
			overflow: OverflowPolicy::Block,
		}
	}

	/// Bounded queue with the given capacity and overflow policy.
	///
	/// # Panics
	///
	/// Panics if `capacity` is zero.
	#[must_use]
	pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
		assert!(capacity > 0, "queue capacity must be > 0");
		Self {
			capacity: Some(capacity),
			overflow,
		}
	}
}

/// Configuration for one [`crate::Runtime`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
	pub thread_name: String,
	pub queue: QueueConfig,
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		Self {
			thread_name: DEFAULT_THREAD_NAME.to_string(),
			queue: QueueConfig::unbounded(),
		}
	}
}

impl RuntimeConfig {
	/// Parses and validates a configuration from TOML.
	///
	/// Missing keys fall back to [`RuntimeConfig::default`].
	pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(src)?;
		config.validate()?;
		Ok(config)
	}

	/// Sets the dispatcher thread name.
	#[must_use]
	pub fn thread_name(mut self, name: impl Into<String>) -> Self {
		self.thread_name = name.into();
		self
	}

	/// Sets the queue configuration.
	#[must_use]
	pub fn queue(mut self, queue: QueueConfig) -> Self {
		self.queue = queue;
		self
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.queue.capacity == Some(0) {
			return Err(ConfigError::ZeroCapacity);
		}
		if self.thread_name.is_empty() {
			return Err(ConfigError::EmptyThreadName);
		}
		Ok(())
	}
}
