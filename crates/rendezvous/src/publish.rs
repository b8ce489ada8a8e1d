use std::path::PathBuf;

use burrow::Credential;
use chrono::{DateTime, Utc};

use crate::error::PublishError;
use crate::identity::DaemonIdentity;
use crate::netinfo::{InterfaceSource, SystemInterfaces};
use crate::snapshot::ConnectivitySnapshot;
use crate::store::ObjectStore;

/// Daemon side of the rendezvous: uploads a fresh connectivity snapshot and
/// the shared credential under the identity's names. Each publish fully
/// replaces the previous artifacts.
pub struct Publisher<S> {
	identity: DaemonIdentity,
	store: S,
	credential_path: PathBuf,
	interfaces: Box<dyn InterfaceSource>,
}

/// What a successful publish uploaded.
#[derive(Debug, Clone)]
pub struct PublishReport {
	pub snapshot: ConnectivitySnapshot,
	pub snapshot_name: String,
	pub credential_name: String,
}

impl<S: ObjectStore> Publisher<S> {
	pub fn new(identity: DaemonIdentity, store: S, credential_path: impl Into<PathBuf>) -> Self {
		Self {
			identity,
			store,
			credential_path: credential_path.into(),
			interfaces: Box::new(SystemInterfaces),
		}
	}

	pub fn with_interfaces(mut self, source: impl InterfaceSource + 'static) -> Self {
		self.interfaces = Box::new(source);
		self
	}

	pub fn identity(&self) -> &DaemonIdentity {
		&self.identity
	}

	pub async fn publish(&self) -> Result<PublishReport, PublishError> {
		self.publish_at(Utc::now()).await
	}

	/// Publishes a snapshot stamped `now`.
	pub async fn publish_at(&self, now: DateTime<Utc>) -> Result<PublishReport, PublishError> {
		let interfaces = self.interfaces.interfaces().map_err(PublishError::Interfaces)?;
		let snapshot = ConnectivitySnapshot::new(self.interfaces.hostname(), now, interfaces);
		let snapshot_name = self.identity.snapshot_name();
		self.put(&snapshot_name, &snapshot.to_json()?).await?;
		tracing::info!(
			"published {} addresses on {} interfaces to {}",
			snapshot.address_count(),
			snapshot.interfaces.len(),
			snapshot_name
		);

		let credential = Credential::load_or_generate(&self.credential_path)?;
		let credential_name = self.identity.credential_name();
		self.put(&credential_name, credential.private_key_pem()).await?;
		tracing::info!("published credential to {}", credential_name);

		Ok(PublishReport {
			snapshot,
			snapshot_name,
			credential_name,
		})
	}

	async fn put(&self, name: &str, bytes: &[u8]) -> Result<(), PublishError> {
		self.store.put(name, bytes).await.map_err(|source| PublishError::Store {
			name: name.to_string(),
			source,
		})
	}
}
