use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use russh::MethodSet;
use russh_keys::key::KeyPair;
use tokio::net::{TcpListener, TcpStream};

use crate::auth::SingleKeyPolicy;
use crate::error::ShellError;
use crate::keys::Credential;
use crate::session::ShellHandler;

pub const DEFAULT_PORT: u16 = 41334;

/// Shell server in the `Stopped` state. Binds at most once.
pub struct ShellServer {
	config: Arc<russh::server::Config>,
	policy: Arc<SingleKeyPolicy>,
	shell: PathBuf,
	bound: AtomicBool,
}

impl ShellServer {
	/// `host_key` is the transport identity; `credential` is the one client key
	/// that will be accepted.
	pub fn new(host_key: KeyPair, credential: &Credential, shell: PathBuf) -> Self {
		let config = russh::server::Config {
			methods: MethodSet::PUBLICKEY,
			keys: vec![host_key],
			auth_rejection_time: Duration::from_secs(1),
			auth_rejection_time_initial: Some(Duration::from_millis(0)),
			inactivity_timeout: Some(Duration::from_secs(3600)),
			..Default::default()
		};
		Self {
			config: Arc::new(config),
			policy: Arc::new(SingleKeyPolicy::new(credential.public_key_bytes())),
			shell,
			bound: AtomicBool::new(false),
		}
	}

	/// Binds the listening socket. A second call on the same server fails
	/// with [`ShellError::AlreadyBound`].
	pub async fn bind(&self, addr: SocketAddr) -> Result<ListeningServer, ShellError> {
		if self.bound.swap(true, Ordering::SeqCst) {
			return Err(ShellError::AlreadyBound);
		}
		let listener = TcpListener::bind(addr).await.map_err(|source| {
			self.bound.store(false, Ordering::SeqCst);
			ShellError::Bind {
				addr: addr.to_string(),
				source,
			}
		})?;
		let local_addr = listener.local_addr()?;
		tracing::info!("shell server listening on {}", local_addr);

		Ok(ListeningServer {
			listener,
			local_addr,
			config: Arc::clone(&self.config),
			policy: Arc::clone(&self.policy),
			shell: self.shell.clone(),
		})
	}
}

pub struct ListeningServer {
	listener: TcpListener,
	local_addr: SocketAddr,
	config: Arc<russh::server::Config>,
	policy: Arc<SingleKeyPolicy>,
	shell: PathBuf,
}

impl ListeningServer {
	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	/// Accepts connections forever, each serviced on its own task.
	pub async fn serve(self) {
		loop {
			let (stream, peer) = match self.listener.accept().await {
				Ok(s) => s,
				Err(e) => {
					tracing::error!("accept error: {}", e);
					continue;
				}
			};

			tracing::info!("incoming connection from {}", peer);
			let config = Arc::clone(&self.config);
			let handler = ShellHandler::new(Arc::clone(&self.policy), self.shell.clone(), Some(peer));
			tokio::spawn(async move {
				if let Err(e) = handle_connection(config, stream, handler).await {
					tracing::warn!("connection from {} ended: {}", peer, e);
				}
			});
		}
	}
}

async fn handle_connection(
	config: Arc<russh::server::Config>,
	stream: TcpStream,
	handler: ShellHandler,
) -> Result<(), russh::Error> {
	let _ = stream.set_nodelay(true);
	let session = russh::server::run_stream(config, stream, handler).await?;
	session.await
}
