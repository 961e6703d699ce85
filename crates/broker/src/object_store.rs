//! Fetches test input/verification files by name. The engine only ever
//! needs `get`; the trait exists so tests can stand in a fake store without
//! a real S3-compatible endpoint.

use async_trait::async_trait;
use aws_sdk_s3::Client;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, name: &str) -> anyhow::Result<Vec<u8>>;
}

/// Talks to any S3-compatible endpoint (the object-store side of the
/// worker is always MinIO or similar in practice, never AWS proper, but the
/// wire protocol is the same).
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(endpoint: &str, access_key: &str, secret_key: &str, bucket: &str) -> Self {
        let credentials =
            aws_sdk_s3::config::Credentials::new(access_key, secret_key, None, None, "rankode-worker");
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .endpoint_url(format!("http://{}", endpoint))
            .credentials_provider(credentials)
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&config).force_path_style(true).build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.to_owned(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, name: &str) -> anyhow::Result<Vec<u8>> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await?;
        let bytes = object.body.collect().await?.into_bytes();
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, sync::Mutex};

    pub struct FakeObjectStore {
        pub files: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl ObjectStore for FakeObjectStore {
        async fn get(&self, name: &str) -> anyhow::Result<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such object: {}", name))
        }
    }

    #[tokio::test]
    async fn fake_store_returns_registered_bytes() {
        let mut files = HashMap::new();
        files.insert("input-1".to_string(), b"3 4\n".to_vec());
        let store = FakeObjectStore { files: Mutex::new(files) };

        let bytes = store.get("input-1").await.unwrap();
        assert_eq!(bytes, b"3 4\n");
    }

    #[tokio::test]
    async fn fake_store_reports_missing_object() {
        let store = FakeObjectStore { files: Mutex::new(HashMap::new()) };
        assert!(store.get("missing").await.is_err());
    }
}
