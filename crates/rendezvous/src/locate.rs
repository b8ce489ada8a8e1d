//! Operator side of the rendezvous: fetch what the daemon published and try
//! its addresses until one answers.
//!
//! This is best-effort address guessing. Nothing tells the client which
//! address is current, so every candidate is tried once, in the order chosen
//! by a [`CandidateOrder`], and the first authenticated session wins. There is
//! no retry after [`ConnectError::NoReachableHost`]; the operator re-invokes.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use burrow::{Credential, ShellSession};
use chrono::{DateTime, Utc};
use tokio::net::TcpStream;

use crate::error::ConnectError;
use crate::identity::DaemonIdentity;
use crate::snapshot::ConnectivitySnapshot;
use crate::store::ObjectStore;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
	pub interface: String,
	pub address: IpAddr,
}

/// Decides the order in which published addresses are tried.
pub trait CandidateOrder: Send + Sync {
	fn order(&self, snapshot: &ConnectivitySnapshot) -> Vec<Candidate>;
}

impl<F> CandidateOrder for F
where
	F: Fn(&ConnectivitySnapshot) -> Vec<Candidate> + Send + Sync,
{
	fn order(&self, snapshot: &ConnectivitySnapshot) -> Vec<Candidate> {
		self(snapshot)
	}
}

/// Interfaces sorted by name; within an interface, addresses in published
/// order. Unparseable addresses are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByInterfaceName;

impl CandidateOrder for ByInterfaceName {
	fn order(&self, snapshot: &ConnectivitySnapshot) -> Vec<Candidate> {
		candidates(snapshot, snapshot.interfaces.keys())
	}
}

/// The named interfaces first, in the given order, then the rest by name.
#[derive(Debug, Clone, Default)]
pub struct PreferInterfaces(pub Vec<String>);

impl CandidateOrder for PreferInterfaces {
	fn order(&self, snapshot: &ConnectivitySnapshot) -> Vec<Candidate> {
		let preferred = self.0.iter().filter(|name| snapshot.interfaces.contains_key(*name));
		let rest = snapshot.interfaces.keys().filter(|name| !self.0.contains(name));
		candidates(snapshot, preferred.chain(rest))
	}
}

fn candidates<'a>(
	snapshot: &ConnectivitySnapshot,
	names: impl Iterator<Item = &'a String>,
) -> Vec<Candidate> {
	let mut out = Vec::new();
	for name in names {
		for addr in snapshot.interfaces.get(name).into_iter().flatten() {
			match addr.parse::<IpAddr>() {
				Ok(address) => out.push(Candidate {
					interface: name.clone(),
					address,
				}),
				Err(_) => tracing::debug!("skipping unparseable address {:?} on {}", addr, name),
			}
		}
	}
	out
}

/// Network side of a connection attempt.
#[async_trait]
pub trait Dialer: Send + Sync {
	type Session: Send;

	/// Bounded reachability check on the shell port.
	async fn probe(&self, addr: SocketAddr, timeout: Duration) -> Result<(), String>;

	/// Authenticated handshake with the published credential.
	async fn handshake(
		&self,
		addr: SocketAddr,
		credential: &Credential,
		timeout: Duration,
	) -> Result<Self::Session, String>;
}

#[async_trait]
impl<T: Dialer + ?Sized> Dialer for &T {
	type Session = T::Session;

	async fn probe(&self, addr: SocketAddr, timeout: Duration) -> Result<(), String> {
		(**self).probe(addr, timeout).await
	}

	async fn handshake(
		&self,
		addr: SocketAddr,
		credential: &Credential,
		timeout: Duration,
	) -> Result<Self::Session, String> {
		(**self).handshake(addr, credential, timeout).await
	}
}

/// Real TCP probe and SSH handshake.
#[derive(Debug, Clone)]
pub struct SshDialer {
	pub user: String,
}

impl Default for SshDialer {
	fn default() -> Self {
		Self {
			user: burrow::client::DEFAULT_USER.to_string(),
		}
	}
}

#[async_trait]
impl Dialer for SshDialer {
	type Session = ShellSession;

	async fn probe(&self, addr: SocketAddr, timeout: Duration) -> Result<(), String> {
		match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
			Ok(Ok(_)) => Ok(()),
			Ok(Err(e)) => Err(e.to_string()),
			Err(_) => Err(format!("no answer within {:?}", timeout)),
		}
	}

	async fn handshake(
		&self,
		addr: SocketAddr,
		credential: &Credential,
		timeout: Duration,
	) -> Result<Self::Session, String> {
		ShellSession::open(addr, credential, &self.user, timeout)
			.await
			.map_err(|e| e.to_string())
	}
}

/// A session together with the candidate that produced it.
#[derive(Debug)]
pub struct Located<T> {
	pub session: T,
	pub candidate: Candidate,
	pub address: SocketAddr,
}

pub struct RendezvousClient<S, D = SshDialer> {
	store: S,
	dialer: D,
	order: Box<dyn CandidateOrder>,
	port: u16,
	probe_timeout: Duration,
	handshake_timeout: Duration,
}

impl<S: ObjectStore> RendezvousClient<S, SshDialer> {
	pub fn new(store: S) -> Self {
		Self::with_dialer(store, SshDialer::default())
	}
}

impl<S: ObjectStore, D: Dialer> RendezvousClient<S, D> {
	pub fn with_dialer(store: S, dialer: D) -> Self {
		Self {
			store,
			dialer,
			order: Box::new(ByInterfaceName),
			port: burrow::DEFAULT_PORT,
			probe_timeout: PROBE_TIMEOUT,
			handshake_timeout: HANDSHAKE_TIMEOUT,
		}
	}

	pub fn port(mut self, port: u16) -> Self {
		self.port = port;
		self
	}

	pub fn order(mut self, order: impl CandidateOrder + 'static) -> Self {
		self.order = Box::new(order);
		self
	}

	pub fn timeouts(mut self, probe: Duration, handshake: Duration) -> Self {
		self.probe_timeout = probe;
		self.handshake_timeout = handshake;
		self
	}

	pub async fn connect(&self, identity: &DaemonIdentity) -> Result<Located<D::Session>, ConnectError> {
		self.connect_at(identity, Utc::now()).await
	}

	/// Runs the rendezvous with `now` as the reference time for freshness.
	pub async fn connect_at(
		&self,
		identity: &DaemonIdentity,
		now: DateTime<Utc>,
	) -> Result<Located<D::Session>, ConnectError> {
		let snapshot = self.fetch_snapshot(identity).await?;
		snapshot.check_fresh(now)?;
		tracing::info!(
			"found {} (captured {}) with {} addresses",
			snapshot.hostname,
			snapshot.captured_at,
			snapshot.address_count()
		);

		let credential = self.fetch_credential(identity).await?;

		let mut last_error = None;
		for candidate in self.order.order(&snapshot) {
			let addr = SocketAddr::new(candidate.address, self.port);

			if let Err(e) = self.dialer.probe(addr, self.probe_timeout).await {
				tracing::debug!("port {} is not open on {}: {}", self.port, candidate.address, e);
				last_error = Some(format!("port {} is not open on {}: {}", self.port, candidate.address, e));
				continue;
			}

			match self.dialer.handshake(addr, &credential, self.handshake_timeout).await {
				Ok(session) => {
					tracing::info!("connected to {} via {} ({})", identity, addr, candidate.interface);
					return Ok(Located {
						session,
						candidate,
						address: addr,
					});
				}
				Err(e) => {
					tracing::warn!("ssh connection to {} failed: {}", addr, e);
					last_error = Some(format!("ssh connection to {} failed: {}", addr, e));
				}
			}
		}

		Err(ConnectError::NoReachableHost { last_error })
	}

	pub async fn fetch_snapshot(&self, identity: &DaemonIdentity) -> Result<ConnectivitySnapshot, ConnectError> {
		let name = identity.snapshot_name();
		let bytes = self
			.store
			.get(&name)
			.await
			.map_err(|source| ConnectError::Fetch { name, source })?;
		ConnectivitySnapshot::from_json(&bytes)
	}

	async fn fetch_credential(&self, identity: &DaemonIdentity) -> Result<Credential, ConnectError> {
		let name = identity.credential_name();
		let pem = self
			.store
			.get(&name)
			.await
			.map_err(|source| ConnectError::Fetch { name, source })?;
		Credential::from_pem(&pem).map_err(ConnectError::Credential)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;

	fn snapshot(interfaces: &[(&str, &[&str])]) -> ConnectivitySnapshot {
		let map: BTreeMap<String, Vec<String>> = interfaces
			.iter()
			.map(|(n, a)| (n.to_string(), a.iter().map(|s| s.to_string()).collect()))
			.collect();
		ConnectivitySnapshot::new("h", Utc::now(), map)
	}

	fn addrs(c: Vec<Candidate>) -> Vec<String> {
		c.into_iter().map(|c| format!("{}={}", c.interface, c.address)).collect()
	}

	#[test]
	fn default_order_keeps_interface_addresses_together() {
		let snap = snapshot(&[
			("wlan0", &["192.168.1.9"]),
			("eth0", &["10.0.0.5", "fe80::1"]),
			("lo", &["127.0.0.1", "not-an-ip"]),
		]);
		assert_eq!(
			addrs(ByInterfaceName.order(&snap)),
			vec!["eth0=10.0.0.5", "eth0=fe80::1", "lo=127.0.0.1", "wlan0=192.168.1.9"]
		);
	}

	#[test]
	fn preferred_interfaces_go_first() {
		let snap = snapshot(&[("wlan0", &["192.168.1.9"]), ("eth0", &["10.0.0.5"]), ("tun0", &["100.64.0.2"])]);
		let order = PreferInterfaces(vec!["tun0".into(), "missing".into()]);
		assert_eq!(
			addrs(order.order(&snap)),
			vec!["tun0=100.64.0.2", "eth0=10.0.0.5", "wlan0=192.168.1.9"]
		);
	}

	#[test]
	fn closures_are_orders() {
		let snap = snapshot(&[("eth0", &["10.0.0.5"]), ("eth1", &["10.0.1.5"])]);
		let reversed = |s: &ConnectivitySnapshot| {
			let mut c = ByInterfaceName.order(s);
			c.reverse();
			c
		};
		assert_eq!(addrs(reversed.order(&snap)), vec!["eth1=10.0.1.5", "eth0=10.0.0.5"]);
	}
}
