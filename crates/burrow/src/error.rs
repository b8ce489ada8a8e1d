use std::io;
use std::path::PathBuf;

/// Errors loading, generating or encoding key material.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
	#[error("failed to generate ed25519 key pair")]
	Generate,
	#[error("failed to encode key: {0}")]
	Encode(#[source] russh_keys::Error),
	#[error("failed to decode private key: {0}")]
	Decode(#[source] russh_keys::Error),
	#[error("{}: {source}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

/// Errors from the shell server or the operator-side session.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
	#[error("shell server already bound in this process")]
	AlreadyBound,
	#[error("failed to bind {addr}: {source}")]
	Bind {
		addr: String,
		#[source]
		source: io::Error,
	},
	#[error("ssh: {0}")]
	Ssh(#[from] russh::Error),
	#[error("failed to allocate pty: {0}")]
	Pty(#[source] io::Error),
	#[error("failed to spawn {shell}: {source}")]
	Spawn {
		shell: String,
		#[source]
		source: io::Error,
	},
	#[error("authentication rejected")]
	AuthRejected,
	#[error("timed out after {0:?}")]
	Timeout(std::time::Duration),
	#[error("session: {0}")]
	Session(String),
	#[error(transparent)]
	Key(#[from] KeyError),
	#[error("io: {0}")]
	Io(#[from] io::Error),
}
