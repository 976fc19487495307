use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A `Ctrl+C`-driven cancellation flag, shared between the thread that installs the handler and
/// whatever cooperative loop polls it between blocking operations.
#[derive(Clone)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
	/// Install a `SIGINT`/`Ctrl+C` handler that sets the flag. Only one handler may be installed
	/// process-wide; subsequent calls return the same logical flag but do not re-register.
	pub fn install() -> Self {
		let flag = Arc::new(AtomicBool::new(false));

		let target = flag.clone();
		let _ = ctrlc::set_handler(move || target.store(true, Ordering::Relaxed));

		Self(flag)
	}

	/// Returns whether shutdown has been requested.
	pub fn requested(&self) -> bool {
		self.0.load(Ordering::Relaxed)
	}

	/// Manually request shutdown, e.g. for tests that do not install a real signal handler.
	pub fn request(&self) {
		self.0.store(true, Ordering::Relaxed);
	}
}
