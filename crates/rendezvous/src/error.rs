use std::io;

use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("object {0} not found")]
	NotFound(String),
	#[error("object store io: {0}")]
	Io(#[from] io::Error),
	#[error("object store: {0}")]
	Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
	#[error("failed to enumerate network interfaces: {0}")]
	Interfaces(#[source] io::Error),
	#[error("failed to serialize snapshot: {0}")]
	Serialize(#[from] serde_json::Error),
	#[error("failed to upload {name}: {source}")]
	Store {
		name: String,
		#[source]
		source: StoreError,
	},
	#[error(transparent)]
	Key(#[from] burrow::KeyError),
}

/// Operator-facing rendezvous failures. Each variant is a distinct outcome
/// the operator can act on.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
	#[error("failed to fetch {name}: {source}")]
	Fetch {
		name: String,
		#[source]
		source: StoreError,
	},
	#[error("published snapshot is malformed: {0}")]
	MalformedSnapshot(#[source] serde_json::Error),
	#[error("published snapshot is stale (captured {captured_at}, {}s old); is the daemon running?", age.num_seconds())]
	StaleSnapshot {
		captured_at: DateTime<Utc>,
		age: chrono::Duration,
	},
	#[error("published credential is unusable: {0}")]
	Credential(#[source] burrow::KeyError),
	#[error("no reachable host: {}", last_error.as_deref().unwrap_or("snapshot lists no addresses"))]
	NoReachableHost { last_error: Option<String> },
}
