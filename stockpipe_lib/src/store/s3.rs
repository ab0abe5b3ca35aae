use async_trait::async_trait;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use super::{BlobStore, ListPage, StoreError};

/// Store backed by one S3 (or S3-compatible) bucket.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn read(&self, key: &str, range: Option<String>) -> Result<Vec<u8>, StoreError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_range(range)
            .send()
            .await
            .map_err(|err| match err.into_service_error() {
                GetObjectError::NoSuchKey(_) => StoreError::NotFound(key.to_string()),
                other => StoreError::Backend(format!("get {}: {}", key, other)),
            })?;
        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Backend(format!("read body of {}: {}", key, e)))?;
        Ok(data.into_bytes().to_vec())
    }
}

#[async_trait]
impl BlobStore for S3Store {
    async fn list_page(
        &self,
        prefix: &str,
        token: Option<String>,
    ) -> Result<ListPage, StoreError> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("list {}: {}", prefix, e.into_service_error())))?;

        let keys = resp
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(str::to_string))
            .collect();
        let next = if resp.is_truncated().unwrap_or(false) {
            resp.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok(ListPage { keys, next })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.read(key, None).await
    }

    /// Ranged GET; only the first `max_bytes` cross the network.
    async fn get_prefix(&self, key: &str, max_bytes: usize) -> Result<Vec<u8>, StoreError> {
        if max_bytes == 0 {
            return Ok(Vec::new());
        }
        self.read(key, Some(format!("bytes=0-{}", max_bytes - 1)))
            .await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("text/csv")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("put {}: {}", key, e.into_service_error())))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
