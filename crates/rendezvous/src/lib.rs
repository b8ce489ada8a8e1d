//! # rendezvous
//!
//! A daemon with no fixed address publishes where it might be reached, plus
//! the key that opens its shell, to an object store both sides can read. An
//! operator fetches those, rejects them if they are more than an hour old, and
//! tries each address in turn.
//!
//! The store is assumed private and authenticated; nothing here encrypts or
//! signs what goes into it.

pub mod error;
pub mod identity;
pub mod locate;
pub mod netinfo;
pub mod publish;
pub mod snapshot;
pub mod store;

pub use error::{ConnectError, PublishError, StoreError};
pub use identity::DaemonIdentity;
pub use locate::{ByInterfaceName, Candidate, CandidateOrder, Dialer, Located, RendezvousClient, SshDialer};
pub use publish::{PublishReport, Publisher};
pub use snapshot::{ConnectivitySnapshot, FRESHNESS_WINDOW};
pub use store::{LocalDirStore, MemoryStore, ObjectStore, S3Settings, S3Store};
