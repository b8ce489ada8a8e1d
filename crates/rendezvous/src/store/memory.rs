use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::ObjectStore;
use crate::error::StoreError;

/// In-process store. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
	objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn len(&self) -> usize {
		self.objects.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.objects.read().await.is_empty()
	}
}

#[async_trait]
impl ObjectStore for MemoryStore {
	async fn put(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
		self.objects.write().await.insert(name.to_string(), bytes.to_vec());
		Ok(())
	}

	async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError> {
		self.objects
			.read()
			.await
			.get(name)
			.cloned()
			.ok_or_else(|| StoreError::NotFound(name.to_string()))
	}
}
