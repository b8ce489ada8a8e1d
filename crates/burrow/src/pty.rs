//! Pseudo-terminal allocation and the interactive shell attached to it.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::pty::{openpty, Winsize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::error::ShellError;

pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// `/bin/bash` when it exists, otherwise `/bin/sh`.
pub fn default_shell() -> PathBuf {
	let bash = Path::new("/bin/bash");
	if bash.exists() {
		bash.to_path_buf()
	} else {
		PathBuf::from("/bin/sh")
	}
}

fn winsize(cols: u16, rows: u16) -> Winsize {
	Winsize {
		ws_row: rows,
		ws_col: cols,
		ws_xpixel: 0,
		ws_ypixel: 0,
	}
}

/// Master side of an allocated pty.
#[derive(Debug)]
pub struct Pty {
	master: OwnedFd,
}

impl Pty {
	pub fn resize(&self, cols: u16, rows: u16) -> io::Result<()> {
		let ws = winsize(cols, rows);
		// SAFETY: the fd is a live pty master owned by self and ws outlives the call.
		let rc = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ as _, &ws) };
		if rc == -1 {
			return Err(io::Error::last_os_error());
		}
		Ok(())
	}

	/// Second handle on the same master, e.g. for resizing from another task.
	pub fn try_clone(&self) -> io::Result<Pty> {
		Ok(Pty {
			master: self.master.try_clone()?,
		})
	}

	fn file(&self) -> io::Result<tokio::fs::File> {
		Ok(tokio::fs::File::from_std(std::fs::File::from(self.master.try_clone()?)))
	}
}

/// A shell running on its own pty.
pub struct ShellProcess {
	pub pty: Pty,
	child: Child,
}

impl ShellProcess {
	/// Allocates a pty of the given size and starts `shell` on it as a session
	/// leader with the slave as its controlling terminal.
	pub fn spawn(shell: &Path, term: &str, cols: u16, rows: u16) -> Result<Self, ShellError> {
		let pair = openpty(Some(&winsize(cols, rows)), None).map_err(|e| ShellError::Pty(e.into()))?;
		let slave = pair.slave;

		let stdio = |fd: &OwnedFd| -> Result<Stdio, ShellError> {
			Ok(Stdio::from(fd.try_clone().map_err(ShellError::Pty)?))
		};

		let mut cmd = Command::new(shell);
		cmd.stdin(stdio(&slave)?)
			.stdout(stdio(&slave)?)
			.stderr(stdio(&slave)?)
			.env("TERM", term)
			.env_remove("NOTIFY_SOCKET")
			.env_remove("WATCHDOG_USEC")
			.env_remove("WATCHDOG_PID")
			.kill_on_drop(true);

		// SAFETY: only async-signal-safe calls run between fork and exec.
		unsafe {
			cmd.pre_exec(|| {
				nix::unistd::setsid().map_err(io::Error::from)?;
				if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
					return Err(io::Error::last_os_error());
				}
				Ok(())
			});
		}

		let child = cmd.spawn().map_err(|source| ShellError::Spawn {
			shell: shell.display().to_string(),
			source,
		})?;
		// The parent keeps no slave fd, so the master sees EOF once the shell
		// and its descendants let go of the terminal.
		drop(cmd);
		drop(slave);

		Ok(Self {
			pty: Pty { master: pair.master },
			child,
		})
	}

	pub fn id(&self) -> Option<u32> {
		self.child.id()
	}
}

/// Where shell output goes.
#[async_trait::async_trait]
pub trait OutputSink: Send {
	/// Returns false when the far side is gone.
	async fn send(&mut self, bytes: &[u8]) -> bool;
}

/// Runs the two copy directions for one session until the shell exits, the
/// output sink closes, or `hangup` fires (or is dropped). Returns the shell's
/// exit code.
pub async fn pump<S: OutputSink>(
	shell: ShellProcess,
	mut sink: S,
	input: mpsc::Receiver<Vec<u8>>,
	mut hangup: oneshot::Receiver<()>,
) -> io::Result<u32> {
	let ShellProcess { pty, mut child } = shell;
	let mut reader = pty.file()?;
	let writer = pty.file()?;
	let feeder = tokio::spawn(feed(writer, input));

	enum Next {
		Output(usize),
		Closed,
		Hangup,
		Exited(io::Result<ExitStatus>),
	}

	let mut buf = vec![0u8; 8192];
	let status = loop {
		let next = tokio::select! {
			read = reader.read(&mut buf) => match read {
				Ok(0) | Err(_) => Next::Closed,
				Ok(n) => Next::Output(n),
			},
			_ = &mut hangup => Next::Hangup,
			status = child.wait() => Next::Exited(status),
		};

		match next {
			Next::Output(n) => {
				if !sink.send(&buf[..n]).await {
					let _ = child.start_kill();
					break child.wait().await;
				}
			}
			// EIO on the master: every slave fd is closed.
			Next::Closed => break child.wait().await,
			Next::Hangup => {
				tracing::debug!("hanging up shell {:?}", child.id());
				let _ = child.start_kill();
				break child.wait().await;
			}
			Next::Exited(status) => {
				drain(&mut reader, &mut sink, &mut buf).await;
				break status;
			}
		}
	};

	feeder.abort();
	Ok(exit_code(status?))
}

async fn feed(mut writer: tokio::fs::File, mut input: mpsc::Receiver<Vec<u8>>) {
	while let Some(bytes) = input.recv().await {
		if writer.write_all(&bytes).await.is_err() || writer.flush().await.is_err() {
			break;
		}
	}
}

/// Forwards output the shell wrote just before exiting.
async fn drain<S: OutputSink>(reader: &mut tokio::fs::File, sink: &mut S, buf: &mut [u8]) {
	loop {
		match tokio::time::timeout(Duration::from_millis(100), reader.read(buf)).await {
			Ok(Ok(n)) if n > 0 => {
				if !sink.send(&buf[..n]).await {
					return;
				}
			}
			_ => return,
		}
	}
}

fn exit_code(status: ExitStatus) -> u32 {
	use std::os::unix::process::ExitStatusExt;
	match (status.code(), status.signal()) {
		(Some(code), _) => code as u32,
		(None, Some(sig)) => 128 + sig as u32,
		(None, None) => 255,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Collect(mpsc::UnboundedSender<Vec<u8>>);

	#[async_trait::async_trait]
	impl OutputSink for Collect {
		async fn send(&mut self, bytes: &[u8]) -> bool {
			self.0.send(bytes.to_vec()).is_ok()
		}
	}

	async fn collected(mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> String {
		let mut out = Vec::new();
		while let Some(chunk) = rx.recv().await {
			out.extend(chunk);
		}
		String::from_utf8_lossy(&out).into_owned()
	}

	#[tokio::test]
	async fn shell_output_reaches_sink_and_exit_code_returns() {
		let shell = ShellProcess::spawn(Path::new("/bin/sh"), "dumb", 80, 24).unwrap();
		let (out_tx, out_rx) = mpsc::unbounded_channel();
		let (in_tx, in_rx) = mpsc::channel(4);
		let (_hangup_tx, hangup_rx) = oneshot::channel();

		in_tx.send(b"echo pty-$((40+2)); exit 3\n".to_vec()).await.unwrap();
		let code = pump(shell, Collect(out_tx), in_rx, hangup_rx).await.unwrap();

		assert_eq!(code, 3);
		assert!(collected(out_rx).await.contains("pty-42"));
	}

	#[tokio::test]
	async fn shell_does_not_inherit_the_notify_socket() {
		std::env::set_var("NOTIFY_SOCKET", "/run/backhaul-test/notify");
		let shell = ShellProcess::spawn(Path::new("/bin/sh"), "dumb", 80, 24).unwrap();
		let (out_tx, out_rx) = mpsc::unbounded_channel();
		let (in_tx, in_rx) = mpsc::channel(4);
		let (_hangup_tx, hangup_rx) = oneshot::channel();

		in_tx
			.send(b"echo notify=${NOTIFY_SOCKET:-unset} wd=${WATCHDOG_USEC:-unset}; exit 0\n".to_vec())
			.await
			.unwrap();
		let code = pump(shell, Collect(out_tx), in_rx, hangup_rx).await.unwrap();

		assert_eq!(code, 0);
		assert!(collected(out_rx).await.contains("notify=unset wd=unset"));
	}

	#[tokio::test]
	async fn hangup_kills_the_shell() {
		let shell = ShellProcess::spawn(Path::new("/bin/sh"), "dumb", 80, 24).unwrap();
		let (out_tx, _out_rx) = mpsc::unbounded_channel();
		let (_in_tx, in_rx) = mpsc::channel(1);
		let (hangup_tx, hangup_rx) = oneshot::channel();

		let task = tokio::spawn(pump(shell, Collect(out_tx), in_rx, hangup_rx));
		hangup_tx.send(()).unwrap();
		let code = tokio::time::timeout(Duration::from_secs(5), task)
			.await
			.unwrap()
			.unwrap()
			.unwrap();
		assert_eq!(code, 128 + libc::SIGKILL as u32);
	}

	#[test]
	fn resize_updates_window() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		let _guard = rt.enter();
		let shell = ShellProcess::spawn(Path::new("/bin/sh"), "dumb", 80, 24).unwrap();
		shell.pty.resize(132, 50).unwrap();

		let mut ws = winsize(0, 0);
		let rc = unsafe { libc::ioctl(shell.pty.master.as_raw_fd(), libc::TIOCGWINSZ as _, &mut ws) };
		assert_eq!(rc, 0);
		assert_eq!((ws.ws_col, ws.ws_row), (132, 50));
	}
}
