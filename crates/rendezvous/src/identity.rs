pub const SNAPSHOT_OBJECT: &str = "ips.json";
pub const CREDENTIAL_OBJECT: &str = "priv.key";

/// Namespaces every published artifact so unrelated daemons can share a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DaemonIdentity {
	pub job_name: String,
	pub host_label: String,
}

impl DaemonIdentity {
	pub fn new(job_name: impl Into<String>, host_label: impl Into<String>) -> Self {
		Self {
			job_name: job_name.into(),
			host_label: host_label.into(),
		}
	}

	/// `<job>/<host>/`, both parts sanitized.
	pub fn prefix(&self) -> String {
		format!("{}/{}/", sanitize(&self.job_name), sanitize(&self.host_label))
	}

	pub fn snapshot_name(&self) -> String {
		format!("{}{}", self.prefix(), SNAPSHOT_OBJECT)
	}

	pub fn credential_name(&self) -> String {
		format!("{}{}", self.prefix(), CREDENTIAL_OBJECT)
	}
}

impl std::fmt::Display for DaemonIdentity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}@{}", self.job_name, self.host_label)
	}
}

/// Lowercases, collapses each run of non-alphanumerics into one `_`, and
/// trims a trailing `_`.
pub fn sanitize(name: &str) -> String {
	let mut out = String::with_capacity(name.len());
	let mut pending_sep = false;
	for c in name.chars() {
		if c.is_ascii_alphanumeric() {
			if pending_sep {
				out.push('_');
				pending_sep = false;
			}
			out.push(c.to_ascii_lowercase());
		} else {
			pending_sep = true;
		}
	}
	out
}
