//! Whole-object key/value storage shared by daemon and operator.
//!
//! Only full overwrite and full fetch are relied upon; no listing, versioning
//! or range reads.

use async_trait::async_trait;

use crate::error::StoreError;

mod local;
mod memory;
mod s3;

pub use local::LocalDirStore;
pub use memory::MemoryStore;
pub use s3::{S3Settings, S3Store};

#[async_trait]
pub trait ObjectStore: Send + Sync {
	/// Replaces the object at `name` in full.
	async fn put(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError>;

	/// Fetches the whole object, or [`StoreError::NotFound`].
	async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError>;
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<T> {
	async fn put(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
		(**self).put(name, bytes).await
	}

	async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError> {
		(**self).get(name).await
	}
}
