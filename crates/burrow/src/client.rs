//! Operator side: authenticate with the shared credential and attach the
//! local terminal to a remote shell.

use std::io::IsTerminal;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::termios::{self, SetArg, Termios};
use russh::client;
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::ShellError;
use crate::keys::Credential;

pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_TERM: &str = "xterm-256color";
pub const FALLBACK_SIZE: (u16, u16) = (80, 40);

/// Host identity is not pinned: the published snapshot is the only source of
/// addresses and carries no host key to check against.
struct TrustOnConnect;

#[async_trait]
impl client::Handler for TrustOnConnect {
	type Error = russh::Error;

	async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
		tracing::debug!("server host key {}", server_public_key.fingerprint());
		Ok(true)
	}
}

/// An authenticated connection to a shell server.
pub struct ShellSession {
	handle: client::Handle<TrustOnConnect>,
	peer: SocketAddr,
}

impl ShellSession {
	/// Handshake and authenticate within `timeout`.
	pub async fn open(
		peer: SocketAddr,
		credential: &Credential,
		user: &str,
		timeout: Duration,
	) -> Result<Self, ShellError> {
		let config = Arc::new(client::Config {
			inactivity_timeout: None,
			..Default::default()
		});
		let key = credential.key_pair();

		let handshake = async {
			let mut handle = client::connect(config, peer, TrustOnConnect).await?;
			if !handle.authenticate_publickey(user, key).await? {
				return Err(ShellError::AuthRejected);
			}
			Ok::<_, ShellError>(handle)
		};

		let handle = tokio::time::timeout(timeout, handshake)
			.await
			.map_err(|_| ShellError::Timeout(timeout))??;
		tracing::debug!("authenticated to {}", peer);
		Ok(Self { handle, peer })
	}

	pub fn peer(&self) -> SocketAddr {
		self.peer
	}

	/// Requests a pty and a shell, then copies `stdin` to the channel and the
	/// channel to `stdout`/`stderr` until the remote side closes. Returns the
	/// remote exit status.
	pub async fn run<R, W, E>(
		self,
		term: &str,
		size: (u16, u16),
		mut resize: mpsc::Receiver<(u16, u16)>,
		mut stdin: R,
		mut stdout: W,
		mut stderr: E,
	) -> Result<u32, ShellError>
	where
		R: AsyncRead + Unpin,
		W: AsyncWrite + Unpin,
		E: AsyncWrite + Unpin,
	{
		let mut channel = self.handle.channel_open_session().await?;
		channel
			.request_pty(false, term, size.0 as u32, size.1 as u32, 0, 0, &[])
			.await?;
		channel.request_shell(true).await?;

		let mut buf = vec![0u8; 4096];
		let mut stdin_open = true;
		let mut resizing = true;
		let mut exit_status = None;

		loop {
			tokio::select! {
				read = stdin.read(&mut buf), if stdin_open => match read {
					Ok(0) | Err(_) => {
						stdin_open = false;
						channel.eof().await?;
					}
					Ok(n) => channel.data(&buf[..n]).await?,
				},
				size = resize.recv(), if resizing => match size {
					Some((cols, rows)) => channel.window_change(cols as u32, rows as u32, 0, 0).await?,
					None => resizing = false,
				},
				msg = channel.wait() => match msg {
					Some(ChannelMsg::Data { ref data }) => {
						stdout.write_all(data).await?;
						stdout.flush().await?;
					}
					Some(ChannelMsg::ExtendedData { ref data, .. }) => {
						stderr.write_all(data).await?;
						stderr.flush().await?;
					}
					Some(ChannelMsg::ExitStatus { exit_status: code }) => exit_status = Some(code),
					Some(ChannelMsg::Failure) => {
						return Err(ShellError::Session("shell request refused".to_string()));
					}
					Some(ChannelMsg::Close) | None => break,
					Some(_) => {}
				},
			}
		}

		let _ = self
			.handle
			.disconnect(Disconnect::ByApplication, "", "English")
			.await;
		exit_status.ok_or_else(|| ShellError::Session("channel closed without exit status".to_string()))
	}

	/// Attaches the process' own terminal: raw mode for the duration of the
	/// session and window-size changes forwarded as they happen.
	pub async fn run_interactive(self) -> Result<u32, ShellError> {
		let size = terminal_size().unwrap_or(FALLBACK_SIZE);
		let _raw = RawMode::enable()?;

		let (resize_tx, resize_rx) = mpsc::channel(4);
		let watcher = tokio::spawn(watch_window_size(resize_tx));

		let result = self
			.run(
				DEFAULT_TERM,
				size,
				resize_rx,
				tokio::io::stdin(),
				tokio::io::stdout(),
				tokio::io::stderr(),
			)
			.await;
		watcher.abort();
		result
	}
}

async fn watch_window_size(tx: mpsc::Sender<(u16, u16)>) {
	use tokio::signal::unix::{signal, SignalKind};
	let Ok(mut winch) = signal(SignalKind::window_change()) else {
		return;
	};
	while winch.recv().await.is_some() {
		if let Some(size) = terminal_size() {
			if tx.send(size).await.is_err() {
				return;
			}
		}
	}
}

/// Columns and rows of the terminal on stdout, if it is one.
pub fn terminal_size() -> Option<(u16, u16)> {
	let stdout = std::io::stdout();
	if !stdout.is_terminal() {
		return None;
	}
	let mut ws = libc::winsize {
		ws_row: 0,
		ws_col: 0,
		ws_xpixel: 0,
		ws_ypixel: 0,
	};
	// SAFETY: ws is a valid out-pointer for TIOCGWINSZ.
	let rc = unsafe { libc::ioctl(stdout.as_raw_fd(), libc::TIOCGWINSZ as _, &mut ws) };
	if rc == -1 || ws.ws_col == 0 || ws.ws_row == 0 {
		return None;
	}
	Some((ws.ws_col, ws.ws_row))
}

/// Puts stdin in raw mode; the previous settings come back on drop.
struct RawMode {
	saved: Option<Termios>,
}

impl RawMode {
	fn enable() -> Result<Self, ShellError> {
		let stdin = std::io::stdin();
		if !stdin.is_terminal() {
			return Ok(Self { saved: None });
		}
		let saved = termios::tcgetattr(&stdin).map_err(std::io::Error::from)?;
		let mut raw = saved.clone();
		termios::cfmakeraw(&mut raw);
		termios::tcsetattr(&stdin, SetArg::TCSANOW, &raw).map_err(std::io::Error::from)?;
		Ok(Self { saved: Some(saved) })
	}
}

impl Drop for RawMode {
	fn drop(&mut self) {
		if let Some(saved) = &self.saved {
			let _ = termios::tcsetattr(&std::io::stdin(), SetArg::TCSANOW, saved);
		}
	}
}
