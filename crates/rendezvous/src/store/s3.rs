use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use super::ObjectStore;
use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
pub struct S3Settings {
	pub bucket: String,
	/// Prepended to every object name.
	pub prefix: String,
	/// Custom endpoint for S3-compatible services (MinIO, B2, R2).
	pub endpoint: Option<String>,
	pub region: Option<String>,
}

/// S3 or S3-compatible bucket. Credentials come from the standard AWS
/// environment/provider chain.
#[derive(Debug, Clone)]
pub struct S3Store {
	client: Client,
	bucket: String,
	prefix: String,
}

impl S3Store {
	pub async fn connect(settings: S3Settings) -> Self {
		let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
		if let Some(region) = settings.region.clone() {
			loader = loader.region(aws_config::Region::new(region));
		}
		if let Some(endpoint) = settings.endpoint.as_deref() {
			loader = loader.endpoint_url(endpoint);
		}
		let conf = loader.load().await;

		let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
			.force_path_style(settings.endpoint.is_some())
			.build();
		Self {
			client: Client::from_conf(s3_conf),
			bucket: settings.bucket,
			prefix: settings.prefix,
		}
	}

	fn key(&self, name: &str) -> String {
		if self.prefix.is_empty() {
			name.to_string()
		} else {
			format!("{}/{}", self.prefix.trim_end_matches('/'), name)
		}
	}
}

#[async_trait]
impl ObjectStore for S3Store {
	async fn put(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
		self.client
			.put_object()
			.bucket(&self.bucket)
			.key(self.key(name))
			.body(ByteStream::from(bytes.to_vec()))
			.send()
			.await
			.map_err(|e| StoreError::Backend(format!("put {}: {}", name, e.into_service_error())))?;
		Ok(())
	}

	async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError> {
		let resp = match self
			.client
			.get_object()
			.bucket(&self.bucket)
			.key(self.key(name))
			.send()
			.await
		{
			Ok(resp) => resp,
			Err(e) => {
				let err = e.into_service_error();
				if err.is_no_such_key() {
					return Err(StoreError::NotFound(name.to_string()));
				}
				return Err(StoreError::Backend(format!("get {}: {}", name, err)));
			}
		};
		let body = resp
			.body
			.collect()
			.await
			.map_err(|e| StoreError::Backend(format!("read {}: {}", name, e)))?;
		Ok(body.into_bytes().to_vec())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn keys_carry_prefix() {
		let store = S3Store::connect(S3Settings {
			bucket: "backups".into(),
			prefix: "team-a/".into(),
			endpoint: Some("http://127.0.0.1:9".into()),
			region: Some("us-east-1".into()),
		})
		.await;
		assert_eq!(store.key("job/primary/ips.json"), "team-a/job/primary/ips.json");

		let bare = S3Store {
			prefix: String::new(),
			..store
		};
		assert_eq!(bare.key("job/primary/ips.json"), "job/primary/ips.json");
	}
}
