//! # burrow
//!
//! Minimal SSH shell server for a daemon that is reachable only by guessing
//! its address, and the matching operator-side client.
//!
//! The server accepts exactly one public key (the shared [`Credential`]),
//! allows only interactive `session` channels, and backs each shell with its
//! own pseudo-terminal.
//!
//! ```rust,no_run
//! use burrow::{keys, Credential, ShellServer};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let host_key = keys::load_host_key(".backhaul/host_key".as_ref())?;
//! let credential = Credential::load_or_generate(".backhaul/client_key".as_ref())?;
//! let server = ShellServer::new(host_key, &credential, burrow::pty::default_shell());
//! let listening = server.bind("0.0.0.0:41334".parse()?).await?;
//! listening.serve().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod keys;
pub mod pty;
pub mod server;
pub mod session;

pub use auth::{AuthDecision, SingleKeyPolicy};
pub use client::ShellSession;
pub use error::{KeyError, ShellError};
pub use keys::Credential;
pub use server::{ListeningServer, ShellServer, DEFAULT_PORT};
