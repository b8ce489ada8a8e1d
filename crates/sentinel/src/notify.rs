//! systemd `sd_notify` over `NOTIFY_SOCKET`.

use std::io;
use std::os::unix::net::{SocketAddr, UnixDatagram};
use std::time::Duration;

/// Notifier bound to the socket systemd handed us, if any. When the daemon is
/// not supervised by systemd every call is a no-op.
#[derive(Debug, Clone, Default)]
pub struct SystemdNotifier {
	socket: Option<String>,
	watchdog: Option<Duration>,
}

impl SystemdNotifier {
	pub fn from_env() -> Self {
		let socket = std::env::var("NOTIFY_SOCKET").ok().filter(|s| !s.is_empty());
		let watchdog = std::env::var("WATCHDOG_USEC")
			.ok()
			.and_then(|v| v.trim().parse::<u64>().ok())
			.filter(|usec| *usec > 0)
			.map(Duration::from_micros);
		Self { socket, watchdog }
	}

	pub fn disabled() -> Self {
		Self::default()
	}

	pub fn with_socket(socket: impl Into<String>) -> Self {
		Self {
			socket: Some(socket.into()),
			watchdog: None,
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.socket.is_some()
	}

	/// Half of the watchdog interval systemd expects pings within.
	pub fn watchdog_interval(&self) -> Option<Duration> {
		self.watchdog.map(|d| d / 2)
	}

	pub fn ready(&self) -> io::Result<()> {
		self.notify("READY=1")
	}

	pub fn stopping(&self) -> io::Result<()> {
		self.notify("STOPPING=1")
	}

	pub fn watchdog(&self) -> io::Result<()> {
		self.notify("WATCHDOG=1")
	}

	pub fn notify(&self, state: &str) -> io::Result<()> {
		let Some(socket) = &self.socket else {
			return Ok(());
		};
		let addr = socket_addr(socket)?;
		let sock = UnixDatagram::unbound()?;
		sock.send_to_addr(state.as_bytes(), &addr)?;
		Ok(())
	}

	/// Pings the watchdog every half interval until the task is aborted.
	/// Returns immediately when no watchdog is configured.
	pub async fn run_watchdog(self) {
		let Some(interval) = self.watchdog_interval() else {
			return;
		};
		let mut ticker = tokio::time::interval(interval);
		loop {
			ticker.tick().await;
			if let Err(e) = self.watchdog() {
				tracing::warn!("failed to send watchdog ping: {}", e);
			}
		}
	}
}

fn socket_addr(socket: &str) -> io::Result<SocketAddr> {
	if let Some(name) = socket.strip_prefix('@') {
		abstract_addr(name)
	} else {
		SocketAddr::from_pathname(socket)
	}
}

#[cfg(target_os = "linux")]
fn abstract_addr(name: &str) -> io::Result<SocketAddr> {
	use std::os::linux::net::SocketAddrExt;
	SocketAddr::from_abstract_name(name.as_bytes())
}

#[cfg(not(target_os = "linux"))]
fn abstract_addr(_name: &str) -> io::Result<SocketAddr> {
	Err(io::Error::new(io::ErrorKind::Unsupported, "abstract sockets are linux-only"))
}
