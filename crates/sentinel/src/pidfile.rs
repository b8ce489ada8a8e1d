//! PID file singleton.
//!
//! A daemon claims its working directory by writing its pid to
//! `.backhaul/daemon.pid`. A file whose pid no longer answers a zero-signal
//! probe is stale and gets reclaimed. A pid we are not permitted to signal
//! counts as stale too, since no trigger could reach it. PID reuse by an
//! unrelated process of the same user still reports a false "alive"; that is
//! an accepted limitation.

use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::SentinelError;

/// Liveness probe and trigger delivery against another process.
pub trait ProcessProbe: Send + Sync {
	/// Zero-effect existence check.
	fn is_alive(&self, pid: i32) -> bool;
	/// Delivers the "run a backup now" signal.
	fn send_trigger(&self, pid: i32) -> io::Result<()>;
}

/// Probe backed by real signals: signal 0 for liveness, SIGUSR1 as trigger.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalProbe;

impl ProcessProbe for SignalProbe {
	fn is_alive(&self, pid: i32) -> bool {
		// EPERM means the pid belongs to another user, so it is not our daemon.
		kill(Pid::from_raw(pid), None).is_ok()
	}

	fn send_trigger(&self, pid: i32) -> io::Result<()> {
		kill(Pid::from_raw(pid), Signal::SIGUSR1).map_err(io::Error::from)
	}
}

/// Reads the pid recorded in `path`. Missing, unreadable or corrupt files yield `None`.
pub fn read_pid(path: &Path) -> Option<i32> {
	std::fs::read_to_string(path)
		.ok()
		.and_then(|s| s.trim().parse::<i32>().ok())
		.filter(|pid| *pid > 0)
}

/// Removes a PID file, treating "already gone" as success.
pub fn remove_pid_file(path: &Path) -> Result<(), SentinelError> {
	match std::fs::remove_file(path) {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
		Err(e) => Err(SentinelError::io(path, e)),
	}
}

/// A claimed PID file. Removed by [`PidFile::release`] or on drop.
#[derive(Debug)]
pub struct PidFile {
	path: PathBuf,
	pid: i32,
	released: bool,
}

impl PidFile {
	/// Claims the singleton for the current process.
	pub fn claim(path: impl Into<PathBuf>, probe: &dyn ProcessProbe) -> Result<Self, SentinelError> {
		Self::claim_as(path, std::process::id() as i32, probe)
	}

	/// Claims the singleton on behalf of `pid`.
	pub fn claim_as(
		path: impl Into<PathBuf>,
		pid: i32,
		probe: &dyn ProcessProbe,
	) -> Result<Self, SentinelError> {
		let path = path.into();

		if path.exists() {
			match read_pid(&path) {
				Some(existing) if existing != pid && probe.is_alive(existing) => {
					return Err(SentinelError::AlreadyRunning { pid: existing });
				}
				_ => {
					tracing::info!("removing stale PID file {}", path.display());
					remove_pid_file(&path)?;
				}
			}
		}

		write_atomically(&path, pid)?;
		tracing::debug!("claimed {} for pid {}", path.display(), pid);

		Ok(Self {
			path,
			pid,
			released: false,
		})
	}

	pub fn pid(&self) -> i32 {
		self.pid
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Deletes the PID file. Idempotent.
	pub fn release(&mut self) -> Result<(), SentinelError> {
		if self.released {
			return Ok(());
		}
		self.released = true;
		remove_pid_file(&self.path)
	}
}

impl Drop for PidFile {
	fn drop(&mut self) {
		if let Err(e) = self.release() {
			tracing::warn!("error removing PID file: {}", e);
		}
	}
}

fn write_atomically(path: &Path, pid: i32) -> Result<(), SentinelError> {
	let tmp = path.with_extension("pid.tmp");
	let write = || -> io::Result<()> {
		let mut file = std::fs::OpenOptions::new()
			.write(true)
			.create(true)
			.truncate(true)
			.mode(0o644)
			.open(&tmp)?;
		file.write_all(pid.to_string().as_bytes())?;
		file.sync_all()?;
		std::fs::rename(&tmp, path)
	};
	write().map_err(|e| {
		let _ = std::fs::remove_file(&tmp);
		SentinelError::io(path, e)
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	struct FixedProbe(bool);

	impl ProcessProbe for FixedProbe {
		fn is_alive(&self, _pid: i32) -> bool {
			self.0
		}
		fn send_trigger(&self, _pid: i32) -> io::Result<()> {
			Ok(())
		}
	}

	#[test]
	fn read_pid_accepts_trailing_newline() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("daemon.pid");
		std::fs::write(&path, "4242\n").unwrap();
		assert_eq!(read_pid(&path), Some(4242));
	}

	#[test]
	fn read_pid_rejects_garbage_and_non_positive() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("daemon.pid");
		std::fs::write(&path, "not-a-pid").unwrap();
		assert_eq!(read_pid(&path), None);
		std::fs::write(&path, "0").unwrap();
		assert_eq!(read_pid(&path), None);
		std::fs::write(&path, "-12").unwrap();
		assert_eq!(read_pid(&path), None);
		assert_eq!(read_pid(&dir.path().join("missing.pid")), None);
	}

	#[test]
	fn claim_writes_decimal_pid_without_newline() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("daemon.pid");
		let pidfile = PidFile::claim_as(&path, 777, &FixedProbe(false)).unwrap();
		assert_eq!(std::fs::read_to_string(&path).unwrap(), "777");
		assert_eq!(pidfile.pid(), 777);
		assert!(!dir.path().join("daemon.pid.tmp").exists());
	}

	#[test]
	fn claim_refuses_live_holder() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("daemon.pid");
		std::fs::write(&path, "31337").unwrap();
		match PidFile::claim_as(&path, 1000, &FixedProbe(true)) {
			Err(SentinelError::AlreadyRunning { pid }) => assert_eq!(pid, 31337),
			other => panic!("expected AlreadyRunning, got {:?}", other),
		}
		assert_eq!(std::fs::read_to_string(&path).unwrap(), "31337");
	}

	#[test]
	fn claim_reclaims_corrupt_file_even_if_probe_says_alive() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("daemon.pid");
		std::fs::write(&path, "garbage").unwrap();
		let _pidfile = PidFile::claim_as(&path, 55, &FixedProbe(true)).unwrap();
		assert_eq!(read_pid(&path), Some(55));
	}

	#[test]
	fn release_and_drop_remove_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("daemon.pid");
		let mut pidfile = PidFile::claim_as(&path, 9, &FixedProbe(false)).unwrap();
		pidfile.release().unwrap();
		assert!(!path.exists());
		pidfile.release().unwrap();

		{
			let _pidfile = PidFile::claim_as(&path, 10, &FixedProbe(false)).unwrap();
			assert!(path.exists());
		}
		assert!(!path.exists());
	}

	#[test]
	fn signal_probe_sees_current_process() {
		assert!(SignalProbe.is_alive(std::process::id() as i32));
		assert!(!SignalProbe.is_alive(i32::MAX));
	}
}
