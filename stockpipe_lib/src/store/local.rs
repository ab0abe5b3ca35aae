use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use super::{BlobStore, ListPage, StoreError};

/// Suffix of in-flight writes; such files never show up in listings.
const PARTIAL_SUFFIX: &str = ".partial";

/// Store rooted at a local directory. Keys are `/`-separated relative paths.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !is_plain {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn walk(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(io_error(&dir, source)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|source| io_error(&dir, source))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|source| io_error(&path, source))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    if let Some(key) = self.key_for(&path) {
                        keys.push(key);
                    }
                }
            }
        }
        Ok(keys)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        let key = parts.join("/");
        if key.ends_with(PARTIAL_SUFFIX) {
            return None;
        }
        Some(key)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        key: path.display().to_string(),
        source,
    }
}

fn read_error(key: &str, source: std::io::Error) -> StoreError {
    if source.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl BlobStore for LocalStore {
    /// The whole tree is walked at once, so there is never a second page.
    async fn list_page(
        &self,
        prefix: &str,
        _token: Option<String>,
    ) -> Result<ListPage, StoreError> {
        let mut keys: Vec<String> = self
            .walk()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(ListPage { keys, next: None })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|source| read_error(key, source))
    }

    async fn get_prefix(&self, key: &str, max_bytes: usize) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|source| read_error(key, source))?;
        let mut bytes = Vec::with_capacity(max_bytes.min(64 * 1024));
        file.take(max_bytes as u64)
            .read_to_end(&mut bytes)
            .await
            .map_err(|source| read_error(key, source))?;
        Ok(bytes)
    }

    /// Writes beside the target and renames over it, so readers never see a
    /// half-written object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(parent, source))?;
        }
        let mut partial = path.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);

        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|source| io_error(&partial, source))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|source| io_error(&path, source))
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
