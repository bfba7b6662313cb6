//! C ABI over one process-wide runtime slot.
//!
//! Mirrors the typed API for hosts that pass opaque payload pointers and
//! plain function pointers. The slot holds an `Arc` so a blocked
//! `smear_wait_for_idle` never stalls concurrent senders.

use std::ffi::{c_int, c_void};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{FatalError, fatal};
use crate::message::Message;
use crate::runtime::Runtime;

/// Handler invoked on the dispatcher thread with the payload it was sent with.
pub type SmearHandler = unsafe extern "C" fn(*const c_void);

static RUNTIME: Mutex<Option<Arc<Runtime>>> = parking_lot::const_mutex(None);

struct ForeignMessage {
	payload: *const c_void,
	handler: SmearHandler,
}

// SAFETY: the caller of `smear_send_message` guarantees the payload may be
// used from the dispatcher thread.
unsafe impl Send for ForeignMessage {}

impl Message for ForeignMessage {
	fn handle(self) {
		// SAFETY: upheld by the caller of `smear_send_message`.
		unsafe { (self.handler)(self.payload) }
	}
}

fn current() -> Option<Arc<Runtime>> {
	RUNTIME.lock().clone()
}

/// Creates the process-wide runtime. Replaces (and stops) any previous one.
#[unsafe(no_mangle)]
pub extern "C" fn smear_init() {
	let previous = RUNTIME.lock().replace(Arc::new(Runtime::default()));
	if let Some(previous) = previous {
		tracing::warn!("smear_init called twice; stopping previous runtime");
		previous.stop();
	}
}

/// Starts the dispatcher. Returns 0 on success, -1 if not initialized or not startable.
#[unsafe(no_mangle)]
pub extern "C" fn smear_run() -> c_int {
	let Some(runtime) = current() else {
		tracing::error!("smear_run called before smear_init");
		return -1;
	};
	match runtime.run() {
		Ok(()) => 0,
		Err(err) => {
			tracing::error!(error = %err, "smear_run failed");
			-1
		}
	}
}

/// Queues `payload` for `handler`. Terminates the process on a null payload
/// or when no runtime accepts the message.
///
/// # Safety
///
/// `handler` must be sound to call with `payload` on another thread, and
/// `payload` must stay valid until the handler has run.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn smear_send_message(payload: *const c_void, handler: SmearHandler) {
	if payload.is_null() {
		fatal(FatalError::NullPayload);
	}
	let Some(runtime) = current() else {
		fatal(FatalError::EnqueueFailure);
	};
	runtime.send(ForeignMessage { payload, handler });
}

/// Blocks until every message sent so far has been handled. Returns at once if not initialized.
#[unsafe(no_mangle)]
pub extern "C" fn smear_wait_for_idle() {
	if let Some(runtime) = current() {
		runtime.wait_for_idle();
	}
}

/// Stops the dispatcher and releases the runtime. Safe to call more than once.
#[unsafe(no_mangle)]
pub extern "C" fn smear_stop() {
	let runtime = RUNTIME.lock().take();
	if let Some(runtime) = runtime {
		runtime.stop();
	}
}
