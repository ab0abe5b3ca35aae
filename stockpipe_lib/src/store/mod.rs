//! Key-value blob storage behind a narrow async seam.
//!
//! The pipeline only needs paginated listing, whole and bounded reads, and
//! whole-object writes. Backends: [`MemoryStore`] for tests, [`LocalStore`]
//! for a directory tree, [`S3Store`] for an S3-compatible bucket.

mod local;
mod memory;
mod s3;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use s3::S3Store;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid key '{0}'")]
    InvalidKey(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// One page of a listing. `next` is an opaque continuation token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next: Option<String>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Lists one page of keys starting with `prefix`.
    async fn list_page(&self, prefix: &str, token: Option<String>)
        -> Result<ListPage, StoreError>;

    /// Follows continuation tokens until exhausted. Keys come back sorted.
    async fn list_all(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut token = None;
        loop {
            let page = self.list_page(prefix, token).await?;
            keys.extend(page.keys);
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Reads at most `max_bytes` from the start of the object.
    async fn get_prefix(&self, key: &str, max_bytes: usize) -> Result<Vec<u8>, StoreError> {
        let mut bytes = self.get(key).await?;
        bytes.truncate(max_bytes);
        Ok(bytes)
    }

    /// Creates or replaces the whole object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// `prefix` with exactly one trailing slash, or empty.
pub fn dir_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}
