use std::path::Path;

use crate::error::SentinelError;
use crate::pidfile::{read_pid, remove_pid_file, ProcessProbe};

/// Where a "run a backup" request ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerRoute {
	/// A live daemon was signalled; the caller returns immediately.
	Delegated { pid: i32 },
	/// No live daemon; the caller runs the backup itself.
	RunLocally { reclaimed_stale: bool },
}

/// Resolves the daemon for `pid_path` and hands it the trigger, or reports
/// that the caller should run in-process. A stale file is deleted and its pid
/// is never signalled. A daemon that cannot be signalled is treated as stale.
pub fn trigger_daemon(pid_path: &Path, probe: &dyn ProcessProbe) -> Result<TriggerRoute, SentinelError> {
	if !pid_path.exists() {
		return Ok(TriggerRoute::RunLocally { reclaimed_stale: false });
	}

	match read_pid(pid_path) {
		Some(pid) if probe.is_alive(pid) => {
			if let Err(e) = probe.send_trigger(pid) {
				tracing::warn!("failed to signal daemon (pid {}): {}", pid, e);
				tracing::info!("removing stale PID file {}", pid_path.display());
				remove_pid_file(pid_path)?;
				return Ok(TriggerRoute::RunLocally { reclaimed_stale: true });
			}
			tracing::info!("sent backup trigger to daemon (pid {})", pid);
			Ok(TriggerRoute::Delegated { pid })
		}
		_ => {
			tracing::info!("removing stale PID file {}", pid_path.display());
			remove_pid_file(pid_path)?;
			Ok(TriggerRoute::RunLocally { reclaimed_stale: true })
		}
	}
}
