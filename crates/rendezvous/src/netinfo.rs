//! Local network identity: hostname and per-interface addresses.

use std::collections::BTreeMap;
use std::io;

pub type InterfaceMap = BTreeMap<String, Vec<String>>;

/// Source of interface addresses. The system implementation reads
/// `getifaddrs`; tests substitute fixed data.
pub trait InterfaceSource: Send + Sync {
	fn interfaces(&self) -> io::Result<InterfaceMap>;
	fn hostname(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
	fn interfaces(&self) -> io::Result<InterfaceMap> {
		local_interfaces()
	}

	fn hostname(&self) -> String {
		hostname()
	}
}

/// Fixed interface data.
#[derive(Debug, Clone)]
pub struct StaticInterfaces {
	pub hostname: String,
	pub interfaces: InterfaceMap,
}

impl StaticInterfaces {
	pub fn new<I, N, A>(hostname: &str, interfaces: I) -> Self
	where
		I: IntoIterator<Item = (N, Vec<A>)>,
		N: Into<String>,
		A: Into<String>,
	{
		Self {
			hostname: hostname.to_string(),
			interfaces: interfaces
				.into_iter()
				.map(|(name, addrs)| (name.into(), addrs.into_iter().map(Into::into).collect()))
				.collect(),
		}
	}
}

impl InterfaceSource for StaticInterfaces {
	fn interfaces(&self) -> io::Result<InterfaceMap> {
		Ok(self.interfaces.clone())
	}

	fn hostname(&self) -> String {
		self.hostname.clone()
	}
}

/// Every IPv4/IPv6 address bound to a local interface, grouped by interface
/// name. Interfaces without an IP address are left out.
pub fn local_interfaces() -> io::Result<InterfaceMap> {
	let mut map = InterfaceMap::new();
	for ifaddr in nix::ifaddrs::getifaddrs()? {
		let Some(address) = ifaddr.address else { continue };
		let ip = if let Some(v4) = address.as_sockaddr_in() {
			v4.ip().to_string()
		} else if let Some(v6) = address.as_sockaddr_in6() {
			v6.ip().to_string()
		} else {
			continue;
		};
		let addrs = map.entry(ifaddr.interface_name).or_insert_with(Vec::new);
		if !addrs.contains(&ip) {
			addrs.push(ip);
		}
	}
	Ok(map)
}

/// `HOSTNAME` from the environment, then the kernel's hostname, then
/// `unknown-host`.
pub fn hostname() -> String {
	if let Ok(name) = std::env::var("HOSTNAME") {
		if !name.is_empty() {
			return name;
		}
	}
	nix::unistd::gethostname()
		.ok()
		.and_then(|name| name.into_string().ok())
		.filter(|name| !name.is_empty())
		.unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn loopback_is_listed() {
		let map = local_interfaces().unwrap();
		assert!(
			map.values().flatten().any(|a| a == "127.0.0.1" || a == "::1"),
			"no loopback address in {:?}",
			map
		);
		assert!(map.values().all(|addrs| !addrs.is_empty()));
	}

	#[test]
	fn hostname_is_never_empty() {
		assert!(!hostname().is_empty());
	}
}
