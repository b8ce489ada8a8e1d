//! Key material: the server's transport host key and the shared client
//! credential. Both are ed25519, stored as PKCS#8 PEM, mode 0600.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;

use russh_keys::key::{KeyPair, PublicKey};
use russh_keys::PublicKeyBase64;

use crate::error::KeyError;

pub fn generate_key() -> Result<KeyPair, KeyError> {
	KeyPair::generate_ed25519().ok_or(KeyError::Generate)
}

pub fn encode_pem(pair: &KeyPair) -> Result<Vec<u8>, KeyError> {
	let mut pem = Vec::new();
	russh_keys::encode_pkcs8_pem(pair, &mut pem).map_err(KeyError::Encode)?;
	Ok(pem)
}

pub fn decode_pem(pem: &[u8]) -> Result<KeyPair, KeyError> {
	russh_keys::decode_secret_key(&String::from_utf8_lossy(pem), None).map_err(KeyError::Decode)
}

/// Loads the key at `path` if it exists and parses; otherwise generates a new
/// one and persists it. Returns the PEM bytes alongside the parsed pair.
pub fn load_or_generate(path: &Path) -> Result<(KeyPair, Vec<u8>), KeyError> {
	if let Ok(pem) = std::fs::read(path) {
		match decode_pem(&pem) {
			Ok(pair) => return Ok((pair, pem)),
			Err(e) => tracing::warn!("replacing unreadable key {}: {}", path.display(), e),
		}
	}

	let pair = generate_key()?;
	let pem = encode_pem(&pair)?;
	write_private(path, &pem)?;
	tracing::info!("generated new key {}", path.display());
	Ok((pair, pem))
}

/// Transport identity of the shell server.
pub fn load_host_key(path: &Path) -> Result<KeyPair, KeyError> {
	load_or_generate(path).map(|(pair, _)| pair)
}

fn write_private(path: &Path, bytes: &[u8]) -> Result<(), KeyError> {
	let io_err = |source| KeyError::Io {
		path: path.to_path_buf(),
		source,
	};
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).map_err(io_err)?;
	}
	let tmp = path.with_extension("tmp");
	let mut file = std::fs::OpenOptions::new()
		.write(true)
		.create(true)
		.truncate(true)
		.mode(0o600)
		.open(&tmp)
		.map_err(io_err)?;
	file.write_all(bytes).map_err(io_err)?;
	file.sync_all().map_err(io_err)?;
	std::fs::rename(&tmp, path).map_err(io_err)
}

/// The single key pair accepted by the shell server.
///
/// The private half is what gets published, so anyone holding the published
/// bytes can authenticate. There is no revocation other than rotating the file.
#[derive(Clone)]
pub struct Credential {
	pair: Arc<KeyPair>,
	pem: Arc<Vec<u8>>,
	public: Arc<Vec<u8>>,
}

impl Credential {
	/// Reuses the credential stored at `path`, generating it on first use.
	pub fn load_or_generate(path: &Path) -> Result<Self, KeyError> {
		let (pair, pem) = load_or_generate(path)?;
		Self::from_parts(pair, pem)
	}

	/// Parses published private-key bytes.
	pub fn from_pem(pem: &[u8]) -> Result<Self, KeyError> {
		let pair = decode_pem(pem)?;
		Self::from_parts(pair, pem.to_vec())
	}

	pub fn generate() -> Result<Self, KeyError> {
		let pair = generate_key()?;
		let pem = encode_pem(&pair)?;
		Self::from_parts(pair, pem)
	}

	fn from_parts(pair: KeyPair, pem: Vec<u8>) -> Result<Self, KeyError> {
		let public = pair.clone_public_key().map_err(KeyError::Encode)?.public_key_bytes();
		Ok(Self {
			pair: Arc::new(pair),
			pem: Arc::new(pem),
			public: Arc::new(public),
		})
	}

	pub fn private_key_pem(&self) -> &[u8] {
		&self.pem
	}

	/// Wire encoding of the public half.
	pub fn public_key_bytes(&self) -> &[u8] {
		&self.public
	}

	pub fn public_key(&self) -> Result<PublicKey, KeyError> {
		self.pair.clone_public_key().map_err(KeyError::Encode)
	}

	pub fn key_pair(&self) -> Arc<KeyPair> {
		Arc::clone(&self.pair)
	}
}

impl std::fmt::Debug for Credential {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Credential").finish_non_exhaustive()
	}
}
