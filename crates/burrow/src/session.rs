//! Per-connection SSH handler: authentication, the single permitted channel
//! type, and the pty-backed shell behind it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{Auth, Handle, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty as PtyMode};
use russh_keys::key::PublicKey;
use tokio::sync::{mpsc, oneshot};

use crate::auth::{AuthDecision, SingleKeyPolicy};
use crate::pty::{self, OutputSink, Pty, ShellProcess};

struct ChannelState {
	term: String,
	cols: u16,
	rows: u16,
	shell: Option<ActiveShell>,
}

impl Default for ChannelState {
	fn default() -> Self {
		Self {
			term: "xterm".to_string(),
			cols: pty::DEFAULT_COLS,
			rows: pty::DEFAULT_ROWS,
			shell: None,
		}
	}
}

struct ActiveShell {
	input: Option<mpsc::Sender<Vec<u8>>>,
	resize: Pty,
	// dropping this hangs the shell up
	_hangup: oneshot::Sender<()>,
}

pub struct ShellHandler {
	policy: Arc<SingleKeyPolicy>,
	shell: PathBuf,
	peer: Option<SocketAddr>,
	channels: HashMap<ChannelId, ChannelState>,
}

impl ShellHandler {
	pub fn new(policy: Arc<SingleKeyPolicy>, shell: PathBuf, peer: Option<SocketAddr>) -> Self {
		Self {
			policy,
			shell,
			peer,
			channels: HashMap::new(),
		}
	}

	fn peer(&self) -> String {
		self.peer.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
	}

	fn start_shell(&mut self, channel: ChannelId, handle: Handle) -> bool {
		let shell_path = self.shell.clone();
		let peer = self.peer();
		let Some(state) = self.channels.get_mut(&channel) else {
			return false;
		};
		if state.shell.is_some() {
			tracing::warn!("shell already running on channel {:?} from {}", channel, peer);
			return false;
		}

		let shell = match ShellProcess::spawn(&shell_path, &state.term, state.cols, state.rows) {
			Ok(shell) => shell,
			Err(e) => {
				tracing::error!("failed to start shell for {}: {}", peer, e);
				return false;
			}
		};
		tracing::info!("started {} (pid {:?}) for {}", shell_path.display(), shell.id(), peer);

		let (input_tx, input_rx) = mpsc::channel(64);
		let (hangup_tx, hangup_rx) = oneshot::channel();
		let resize = match shell.pty.try_clone() {
			Ok(p) => p,
			Err(e) => {
				tracing::error!("failed to share pty for {}: {}", peer, e);
				return false;
			}
		};

		state.shell = Some(ActiveShell {
			input: Some(input_tx),
			resize,
			_hangup: hangup_tx,
		});

		tokio::spawn(async move {
			let sink = ChannelSink {
				handle: handle.clone(),
				channel,
			};
			let code = match pty::pump(shell, sink, input_rx, hangup_rx).await {
				Ok(code) => code,
				Err(e) => {
					tracing::warn!("shell session for {} ended with error: {}", peer, e);
					255
				}
			};
			tracing::info!("shell for {} exited with status {}", peer, code);
			let _ = handle.exit_status_request(channel, code).await;
			let _ = handle.eof(channel).await;
			let _ = handle.close(channel).await;
		});
		true
	}
}

struct ChannelSink {
	handle: Handle,
	channel: ChannelId,
}

#[async_trait]
impl OutputSink for ChannelSink {
	async fn send(&mut self, bytes: &[u8]) -> bool {
		self.handle.data(self.channel, CryptoVec::from_slice(bytes)).await.is_ok()
	}
}

#[async_trait]
impl russh::server::Handler for ShellHandler {
	type Error = russh::Error;

	async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth, Self::Error> {
		match self.policy.authenticate(public_key) {
			AuthDecision::Accept => {
				tracing::info!(
					"accepted {} key for user {} from {}",
					public_key.name(),
					user,
					self.peer()
				);
				Ok(Auth::Accept)
			}
			AuthDecision::Reject => {
				tracing::warn!(
					"rejected {} key {} for user {} from {}",
					public_key.name(),
					public_key.fingerprint(),
					user,
					self.peer()
				);
				Ok(Auth::Reject {
					proceed_with_methods: None,
				})
			}
		}
	}

	async fn channel_open_session(
		&mut self,
		channel: Channel<Msg>,
		_session: &mut Session,
	) -> Result<bool, Self::Error> {
		self.channels.insert(channel.id(), ChannelState::default());
		tracing::debug!("session channel opened from {}", self.peer());
		Ok(true)
	}

	async fn channel_open_direct_tcpip(
		&mut self,
		_channel: Channel<Msg>,
		host_to_connect: &str,
		port_to_connect: u32,
		_originator_address: &str,
		_originator_port: u32,
		_session: &mut Session,
	) -> Result<bool, Self::Error> {
		tracing::warn!(
			"rejected direct-tcpip channel to {}:{} from {}",
			host_to_connect,
			port_to_connect,
			self.peer()
		);
		Ok(false)
	}

	async fn channel_open_x11(
		&mut self,
		_channel: Channel<Msg>,
		_originator_address: &str,
		_originator_port: u32,
		_session: &mut Session,
	) -> Result<bool, Self::Error> {
		tracing::warn!("rejected x11 channel from {}", self.peer());
		Ok(false)
	}

	async fn tcpip_forward(
		&mut self,
		address: &str,
		port: &mut u32,
		_session: &mut Session,
	) -> Result<bool, Self::Error> {
		tracing::warn!("rejected tcpip-forward {}:{} from {}", address, port, self.peer());
		Ok(false)
	}

	#[allow(clippy::too_many_arguments)]
	async fn pty_request(
		&mut self,
		channel: ChannelId,
		term: &str,
		col_width: u32,
		row_height: u32,
		_pix_width: u32,
		_pix_height: u32,
		_modes: &[(PtyMode, u32)],
		session: &mut Session,
	) -> Result<(), Self::Error> {
		match self.channels.get_mut(&channel) {
			Some(state) if state.shell.is_none() => {
				state.term = term.to_string();
				if col_width > 0 && row_height > 0 {
					state.cols = col_width.min(u16::MAX as u32) as u16;
					state.rows = row_height.min(u16::MAX as u32) as u16;
				}
				session.channel_success(channel);
			}
			_ => session.channel_failure(channel),
		}
		Ok(())
	}

	async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
		if self.start_shell(channel, session.handle()) {
			session.channel_success(channel);
		} else {
			session.channel_failure(channel);
		}
		Ok(())
	}

	async fn exec_request(
		&mut self,
		channel: ChannelId,
		data: &[u8],
		session: &mut Session,
	) -> Result<(), Self::Error> {
		tracing::warn!(
			"unsupported exec request {:?} from {}",
			String::from_utf8_lossy(data),
			self.peer()
		);
		session.channel_failure(channel);
		Ok(())
	}

	async fn subsystem_request(
		&mut self,
		channel: ChannelId,
		name: &str,
		session: &mut Session,
	) -> Result<(), Self::Error> {
		tracing::warn!("unsupported subsystem request {} from {}", name, self.peer());
		session.channel_failure(channel);
		Ok(())
	}

	async fn x11_request(
		&mut self,
		channel: ChannelId,
		_single_connection: bool,
		_x11_auth_protocol: &str,
		_x11_auth_cookie: &str,
		_x11_screen_number: u32,
		session: &mut Session,
	) -> Result<(), Self::Error> {
		tracing::warn!("unsupported x11 request from {}", self.peer());
		session.channel_failure(channel);
		Ok(())
	}

	async fn env_request(
		&mut self,
		channel: ChannelId,
		variable_name: &str,
		_variable_value: &str,
		session: &mut Session,
	) -> Result<(), Self::Error> {
		tracing::debug!("unsupported env request {} from {}", variable_name, self.peer());
		session.channel_failure(channel);
		Ok(())
	}

	async fn window_change_request(
		&mut self,
		channel: ChannelId,
		col_width: u32,
		row_height: u32,
		_pix_width: u32,
		_pix_height: u32,
		_session: &mut Session,
	) -> Result<(), Self::Error> {
		let Some(state) = self.channels.get_mut(&channel) else {
			return Ok(());
		};
		state.cols = col_width.min(u16::MAX as u32) as u16;
		state.rows = row_height.min(u16::MAX as u32) as u16;
		if let Some(shell) = &state.shell {
			if let Err(e) = shell.resize.resize(state.cols, state.rows) {
				tracing::debug!("failed to resize pty: {}", e);
			}
		}
		Ok(())
	}

	async fn data(&mut self, channel: ChannelId, data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
		let input = self
			.channels
			.get(&channel)
			.and_then(|s| s.shell.as_ref())
			.and_then(|shell| shell.input.clone());
		if let Some(input) = input {
			let _ = input.send(data.to_vec()).await;
		}
		Ok(())
	}

	async fn channel_eof(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
		// stop feeding input; the shell keeps running until it exits
		if let Some(state) = self.channels.get_mut(&channel) {
			if let Some(shell) = state.shell.as_mut() {
				shell.input = None;
			}
		}
		Ok(())
	}

	async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
		if self.channels.remove(&channel).is_some() {
			tracing::debug!("channel {:?} closed by {}", channel, self.peer());
		}
		Ok(())
	}
}
