use crate::notify::SystemdNotifier;
use crate::paths::DaemonPaths;
use crate::run_lock::RunLock;

/// Process-wide coordination state, owned once and handed to each component
/// that needs it. Tests build a fresh one per case.
#[derive(Debug, Clone)]
pub struct DaemonContext {
	pub paths: DaemonPaths,
	pub run_lock: RunLock,
	pub notifier: SystemdNotifier,
}

impl DaemonContext {
	pub fn new(paths: DaemonPaths) -> Self {
		Self {
			paths,
			run_lock: RunLock::new(),
			notifier: SystemdNotifier::from_env(),
		}
	}

	pub fn with_notifier(mut self, notifier: SystemdNotifier) -> Self {
		self.notifier = notifier;
		self
	}
}
