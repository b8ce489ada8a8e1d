use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConnectError;

/// Published connectivity older than this is never used.
pub const FRESHNESS_WINDOW: std::time::Duration = std::time::Duration::from_secs(60 * 60);

/// Where a daemon could be reached at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivitySnapshot {
	pub hostname: String,
	#[serde(rename = "timestamp")]
	pub captured_at: DateTime<Utc>,
	pub interfaces: BTreeMap<String, Vec<String>>,
}

impl ConnectivitySnapshot {
	/// Drops interfaces without addresses and duplicate addresses within one
	/// interface, keeping first-seen order.
	pub fn new(
		hostname: impl Into<String>,
		captured_at: DateTime<Utc>,
		interfaces: impl IntoIterator<Item = (String, Vec<String>)>,
	) -> Self {
		let interfaces = interfaces
			.into_iter()
			.filter_map(|(name, addrs)| {
				let mut unique: Vec<String> = Vec::with_capacity(addrs.len());
				for addr in addrs {
					if !unique.contains(&addr) {
						unique.push(addr);
					}
				}
				(!unique.is_empty()).then_some((name, unique))
			})
			.collect();
		Self {
			hostname: hostname.into(),
			captured_at,
			interfaces,
		}
	}

	pub fn age(&self, now: DateTime<Utc>) -> Duration {
		now - self.captured_at
	}

	/// Exactly one window old is still fresh; a capture time in the future
	/// (clock skew) is treated as fresh.
	pub fn check_fresh(&self, now: DateTime<Utc>) -> Result<(), ConnectError> {
		let age = self.age(now);
		if age.num_milliseconds() > FRESHNESS_WINDOW.as_millis() as i64 {
			return Err(ConnectError::StaleSnapshot {
				captured_at: self.captured_at,
				age,
			});
		}
		Ok(())
	}

	pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
		serde_json::to_vec_pretty(self)
	}

	pub fn from_json(bytes: &[u8]) -> Result<Self, ConnectError> {
		serde_json::from_slice(bytes).map_err(ConnectError::MalformedSnapshot)
	}

	pub fn address_count(&self) -> usize {
		self.interfaces.values().map(Vec::len).sum()
	}
}
