use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use crate::error::SentinelError;

/// Name of the per-working-directory state folder.
pub const STATE_DIR_NAME: &str = ".backhaul";

/// Well-known file locations for one daemon, all relative to its working directory.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
	pub work_dir: PathBuf,
}

impl DaemonPaths {
	pub fn new(work_dir: impl Into<PathBuf>) -> Self {
		Self {
			work_dir: work_dir.into(),
		}
	}

	/// Paths rooted at the process' current directory.
	pub fn current() -> Result<Self, SentinelError> {
		let dir = std::env::current_dir().map_err(|e| SentinelError::io(".", e))?;
		Ok(Self::new(dir))
	}

	pub fn state_dir(&self) -> PathBuf {
		self.work_dir.join(STATE_DIR_NAME)
	}

	pub fn pid_path(&self) -> PathBuf {
		self.state_dir().join("daemon.pid")
	}

	pub fn log_path(&self) -> PathBuf {
		self.state_dir().join("daemon.log")
	}

	pub fn host_key_path(&self) -> PathBuf {
		self.state_dir().join("host_key")
	}

	pub fn client_key_path(&self) -> PathBuf {
		self.state_dir().join("client_key")
	}

	pub fn tmp_dir(&self) -> PathBuf {
		self.state_dir().join("tmp")
	}

	pub fn config_path(&self) -> PathBuf {
		self.work_dir.join("backhaul.toml")
	}

	/// Creates the state directory (mode 0700). Failing here is fatal at startup.
	pub fn ensure_state_dir(&self) -> Result<(), SentinelError> {
		create_private_dir(&self.state_dir())?;
		create_private_dir(&self.tmp_dir())
	}
}

fn create_private_dir(path: &Path) -> Result<(), SentinelError> {
	DirBuilder::new()
		.recursive(true)
		.mode(0o700)
		.create(path)
		.map_err(|e| SentinelError::io(path, e))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn state_files_live_under_state_dir() {
		let paths = DaemonPaths::new("/srv/app");
		let state = paths.state_dir();
		assert_eq!(state, PathBuf::from("/srv/app/.backhaul"));
		for p in [
			paths.pid_path(),
			paths.log_path(),
			paths.host_key_path(),
			paths.client_key_path(),
			paths.tmp_dir(),
		] {
			assert!(p.starts_with(&state), "{} not under state dir", p.display());
		}
		assert_eq!(paths.config_path(), PathBuf::from("/srv/app/backhaul.toml"));
	}

	#[test]
	fn ensure_state_dir_is_private() {
		use std::os::unix::fs::PermissionsExt;

		let dir = tempfile::tempdir().unwrap();
		let paths = DaemonPaths::new(dir.path());
		paths.ensure_state_dir().unwrap();
		let mode = std::fs::metadata(paths.state_dir()).unwrap().permissions().mode();
		assert_eq!(mode & 0o777, 0o700);
		assert!(paths.tmp_dir().is_dir());
	}
}
