use std::io;
use std::path::{Path, PathBuf};

/// Errors from the daemon control plane.
#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
	/// A live daemon already holds the PID file.
	#[error("another daemon instance is already running with pid {pid}")]
	AlreadyRunning { pid: i32 },
	/// Filesystem error on one of the daemon's state files.
	#[error("{}: {source}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	/// The control signal handlers could not be installed.
	#[error("failed to install signal handlers: {0}")]
	SignalSetup(#[source] io::Error),
}

impl SentinelError {
	pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
		SentinelError::Io {
			path: path.as_ref().to_path_buf(),
			source,
		}
	}
}
