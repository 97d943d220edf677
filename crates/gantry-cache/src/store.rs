//! Blob store implementations.

use crate::keys::{matches_prefix, sanitize_key};
use async_trait::async_trait;
use gantry_core::ports::{BlobInfo, BlobStore};
use gantry_core::{CacheError, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

fn unavailable(message: String) -> gantry_core::Error {
    CacheError::StoreUnavailable(message).into()
}

/// Filesystem-based blob store for local runs.
pub struct FilesystemStore {
    root_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &std::path::Path {
        &self.root_dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root_dir.join(sanitize_key(key))
    }
}

#[async_trait]
impl BlobStore for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.key_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(format!("Failed to read cache: {e}"))),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.root_dir)
            .await
            .map_err(|e| unavailable(format!("Failed to create cache dir: {e}")))?;

        // Write then rename so readers never observe a partial blob.
        let key_path = self.key_path(key);
        let tmp_path = key_path.with_extension(format!("tmp-{}", std::process::id()));
        tokio::fs::write(&tmp_path, bytes)
            .await
            .map_err(|e| unavailable(format!("Failed to write cache: {e}")))?;
        tokio::fs::rename(&tmp_path, &key_path)
            .await
            .map_err(|e| unavailable(format!("Failed to commit cache: {e}")))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.key_path(key))
            .await
            .unwrap_or(false))
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<BlobInfo>> {
        if !self.root_dir.exists() {
            return Ok(vec![]);
        }

        let sanitized_prefix = prefix.map(sanitize_key).unwrap_or_default();
        let mut entries = vec![];
        let mut read_dir = tokio::fs::read_dir(&self.root_dir)
            .await
            .map_err(|e| unavailable(format!("Failed to read cache dir: {e}")))?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| unavailable(format!("Failed to read entry: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.contains(".tmp-") || !matches_prefix(&name, &sanitized_prefix) {
                continue;
            }
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| unavailable(format!("Failed to read metadata: {e}")))?;
            entries.push(BlobInfo {
                key: name,
                size_bytes: metadata.len(),
            });
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(format!("Failed to delete cache: {e}"))),
        }
    }
}

/// In-memory blob store.
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<BlobInfo>> {
        let prefix = prefix.unwrap_or_default();
        Ok(self
            .blobs
            .read()
            .await
            .iter()
            .filter(|(key, _)| matches_prefix(key, prefix))
            .map(|(key, bytes)| BlobInfo {
                key: key.clone(),
                size_bytes: bytes.len() as u64,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filesystem_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        assert_eq!(store.get("npm-abc").await.unwrap(), None);
        store.put("npm-abc", b"blob").await.unwrap();
        assert_eq!(store.get("npm-abc").await.unwrap(), Some(b"blob".to_vec()));
        assert!(store.exists("npm-abc").await.unwrap());

        store.put("cargo-def", b"other").await.unwrap();
        let listed = store.list(Some("npm")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "npm-abc");
        assert_eq!(listed[0].size_bytes, 4);

        store.delete("npm-abc").await.unwrap();
        assert!(!store.exists("npm-abc").await.unwrap());
        store.delete("npm-abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_filesystem_store_list_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().join("absent"));
        assert!(store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        store.put("a-1", b"x").await.unwrap();
        store.put("b-1", b"yy").await.unwrap();
        assert_eq!(store.len().await, 2);
        assert_eq!(store.list(Some("b")).await.unwrap()[0].size_bytes, 2);
        store.delete("a-1").await.unwrap();
        assert_eq!(store.get("a-1").await.unwrap(), None);
    }
}
