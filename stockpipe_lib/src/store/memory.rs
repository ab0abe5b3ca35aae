use async_trait::async_trait;
use dashmap::DashMap;

use super::{BlobStore, ListPage, StoreError};

const DEFAULT_PAGE_SIZE: usize = 1000;

/// Thread-safe in-memory store.
///
/// Listing is paginated like a remote bucket so pagination paths get
/// exercised; the continuation token is the last key of the previous page.
pub struct MemoryStore {
    objects: DashMap<String, Vec<u8>>,
    page_size: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: DashMap::new(),
            page_size: page_size.max(1),
        }
    }

    /// Synchronous insert for seeding fixtures.
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects.insert(key.into(), bytes.into());
    }

    pub fn get_sync(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn list_page(
        &self,
        prefix: &str,
        token: Option<String>,
    ) -> Result<ListPage, StoreError> {
        let mut matching: Vec<String> = self
            .objects
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .filter(|k| token.as_ref().map_or(true, |t| k > t))
            .collect();
        matching.sort();

        let next = if matching.len() > self.page_size {
            matching.truncate(self.page_size);
            matching.last().cloned()
        } else {
            None
        };
        Ok(ListPage {
            keys: matching,
            next,
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.get_sync(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        self.objects.insert(key.to_string(), bytes);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
