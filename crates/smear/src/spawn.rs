use std::any::Any;

/// Spawns the dedicated dispatcher OS thread.
pub(crate) fn spawn_dispatcher_thread<F, R>(name: impl Into<String>, f: F) -> std::io::Result<std::thread::JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let name = name.into();
	tracing::trace!(thread = %name, "smear.spawn_dispatcher");
	std::thread::Builder::new().name(name).spawn(f)
}

/// Extracts a panic message from a joined thread's panic payload.
///
/// Returns `None` for payloads that are neither `&str` nor `String`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
	if let Some(s) = payload.downcast_ref::<&'static str>() {
		Some((*s).to_string())
	} else {
		payload.downcast_ref::<String>().cloned()
	}
}
