//! Single-dispatcher message runtime.
//!
//! Producers on any thread [`Runtime::send`] messages into one queue; a
//! dedicated dispatcher thread pops them in FIFO order and runs each
//! handler synchronously. [`Runtime::wait_for_idle`] blocks until every
//! message sent so far has been handled.
//!
//! * [`Runtime`]: lifecycle (`new` / `run` / `stop`), send, and idle waits
//! * [`Message`]: one-shot handler trait; [`Handled`] pairs a payload with a closure
//! * [`MessageQueue`]: queue contract; [`Mailbox`] is the default implementation
//! * [`ffi`]: C ABI over a process-wide runtime

mod config;
mod dispatcher;
mod error;
pub mod ffi;
mod idle;
mod mailbox;
mod message;
mod queue;
mod runtime;
mod spawn;
mod token;

pub use config::{OverflowPolicy, QueueConfig, RuntimeConfig};
pub use dispatcher::DispatcherExit;
pub use error::{ConfigError, FatalError, RuntimeError, fatal};
pub use mailbox::Mailbox;
pub use message::{Envelope, Handled, Message};
pub use queue::{EnqueueError, EnqueueOutcome, MessageQueue};
pub use runtime::{MessageSender, Runtime, RuntimeState, RuntimeStats, SendOutcome, StopReport};
