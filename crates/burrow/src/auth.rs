use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
	Accept,
	Reject,
}

/// Accepts exactly one public key, compared byte for byte on its wire
/// encoding. Usernames are ignored. This is a shared-secret model: whoever
/// holds the published private key is every user.
#[derive(Debug, Clone)]
pub struct SingleKeyPolicy {
	expected: Vec<u8>,
}

impl SingleKeyPolicy {
	pub fn new(expected_public_key: impl Into<Vec<u8>>) -> Self {
		Self {
			expected: expected_public_key.into(),
		}
	}

	pub fn authenticate(&self, offered: &PublicKey) -> AuthDecision {
		self.authenticate_bytes(&offered.public_key_bytes())
	}

	pub fn authenticate_bytes(&self, offered: &[u8]) -> AuthDecision {
		if !self.expected.is_empty() && offered == self.expected.as_slice() {
			AuthDecision::Accept
		} else {
			AuthDecision::Reject
		}
	}
}
