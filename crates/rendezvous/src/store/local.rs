use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::ObjectStore;
use crate::error::StoreError;

/// Objects as files under a root directory, e.g. a shared network mount.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
	root: PathBuf,
}

impl LocalDirStore {
	pub fn new(root: impl AsRef<Path>) -> Self {
		Self {
			root: root.as_ref().to_path_buf(),
		}
	}

	fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
		let rel = Path::new(name);
		if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
			return Err(StoreError::Backend(format!("invalid object name {:?}", name)));
		}
		Ok(self.root.join(rel))
	}
}

#[async_trait]
impl ObjectStore for LocalDirStore {
	async fn put(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
		let path = self.path_for(name)?;
		if let Some(dir) = path.parent() {
			fs::create_dir_all(dir).await?;
		}
		// write-then-rename so readers never see a partial object
		let tmp = path.with_extension("partial");
		let mut f = fs::File::create(&tmp).await?;
		f.write_all(bytes).await?;
		f.flush().await?;
		f.sync_all().await?;
		drop(f);
		fs::rename(&tmp, &path).await?;
		Ok(())
	}

	async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError> {
		let path = self.path_for(name)?;
		match fs::read(&path).await {
			Ok(buf) => Ok(buf),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(name.to_string())),
			Err(e) => Err(e.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn nested_names_become_directories() {
		let dir = tempfile::tempdir().unwrap();
		let store = LocalDirStore::new(dir.path());
		store.put("job/primary/priv.key", b"secret").await.unwrap();
		assert!(dir.path().join("job/primary/priv.key").is_file());
		assert_eq!(store.get("job/primary/priv.key").await.unwrap(), b"secret");
		assert!(!dir.path().join("job/primary/priv.partial").exists());
	}

	#[tokio::test]
	async fn missing_and_escaping_names() {
		let dir = tempfile::tempdir().unwrap();
		let store = LocalDirStore::new(dir.path());
		assert!(matches!(store.get("nope").await, Err(StoreError::NotFound(_))));
		assert!(matches!(store.put("../escape", b"x").await, Err(StoreError::Backend(_))));
		assert!(matches!(store.get("/etc/passwd").await, Err(StoreError::Backend(_))));
	}
}
