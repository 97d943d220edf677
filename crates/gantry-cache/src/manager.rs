//! Cache manager: key derivation, restore and idempotent save over a blob store.

use crate::compression::{decode, encode};
use crate::keys::key_for;
use crate::types::{CacheKey, CacheStats, CompressionType, RestoreOutcome, SaveOutcome};
use gantry_core::Result;
use gantry_core::ports::{BlobInfo, BlobStore, Workspace};
use gantry_core::workflow::CacheSpec;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct CacheManager {
    store: Arc<dyn BlobStore>,
    compression: CompressionType,
    // Serialises check-then-put so concurrent saves of one key store it once.
    save_lock: Mutex<()>,
    stats: StdMutex<CacheStats>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self::with_compression(store, CompressionType::default())
    }

    pub fn with_compression(store: Arc<dyn BlobStore>, compression: CompressionType) -> Self {
        Self {
            store,
            compression,
            save_lock: Mutex::new(()),
            stats: StdMutex::new(CacheStats::default()),
        }
    }

    /// Compute the key for a `CacheSpec` from the workspace's manifest files.
    pub async fn key(&self, spec: &CacheSpec, workspace: &dyn Workspace) -> Result<CacheKey> {
        key_for(spec, workspace).await
    }

    /// Look up an entry. Store failures and corrupt entries are reported as a miss.
    pub async fn restore(&self, key: &CacheKey) -> RestoreOutcome {
        let blob = match self.store.get(key.as_str()).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                self.record(|s| s.misses += 1);
                return RestoreOutcome::Miss;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache store unavailable, treating as miss");
                self.record(|s| s.misses += 1);
                return RestoreOutcome::Miss;
            }
        };

        match decode(&blob) {
            Ok(bytes) => {
                info!(key = %key, size_bytes = bytes.len(), "Cache hit");
                self.record(|s| {
                    s.hits += 1;
                    s.total_bytes_downloaded += blob.len() as u64;
                });
                RestoreOutcome::Hit(bytes)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache entry unreadable, treating as miss");
                self.record(|s| s.misses += 1);
                RestoreOutcome::Miss
            }
        }
    }

    /// Store an entry unless the key already has one.
    pub async fn save(&self, key: &CacheKey, bytes: &[u8]) -> SaveOutcome {
        let _guard = self.save_lock.lock().await;

        match self.store.exists(key.as_str()).await {
            Ok(true) => {
                debug!(key = %key, "Cache entry already present");
                return SaveOutcome::AlreadyPresent;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Cache store unavailable, skipping save");
                return SaveOutcome::Skipped;
            }
        }

        let blob = match encode(bytes, self.compression) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to compress cache entry");
                return SaveOutcome::Skipped;
            }
        };

        match self.store.put(key.as_str(), &blob).await {
            Ok(()) => {
                info!(
                    key = %key,
                    size_bytes = bytes.len(),
                    stored_bytes = blob.len(),
                    compression = ?self.compression,
                    "Cache saved"
                );
                self.record(|s| {
                    s.uploads += 1;
                    s.total_bytes_uploaded += blob.len() as u64;
                });
                SaveOutcome::Stored {
                    size_bytes: blob.len() as u64,
                }
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to store cache entry");
                SaveOutcome::Skipped
            }
        }
    }

    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<BlobInfo>> {
        self.store.list(prefix).await
    }

    /// Delete every entry matching the prefix. Returns how many were removed.
    pub async fn clear(&self, prefix: Option<&str>) -> Result<usize> {
        let _guard = self.save_lock.lock().await;
        let entries = self.store.list(prefix).await?;
        for entry in &entries {
            self.store.delete(&entry.key).await?;
        }
        Ok(entries.len())
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::compute_key;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use gantry_core::CacheError;

    struct BrokenStore;

    #[async_trait]
    impl BlobStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err(CacheError::StoreUnavailable("connection refused".into()).into())
        }

        async fn put(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
            Err(CacheError::StoreUnavailable("connection refused".into()).into())
        }

        async fn list(&self, _prefix: Option<&str>) -> Result<Vec<BlobInfo>> {
            Ok(vec![])
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    fn key(contents: &str) -> CacheKey {
        compute_key(
            "npm",
            &[("package-lock.json".to_string(), contents.as_bytes().to_vec())],
        )
    }

    #[tokio::test]
    async fn test_save_then_restore_yields_identical_bytes() {
        let manager = CacheManager::new(Arc::new(MemoryStore::new()));
        let key = key("v1");
        let payload = b"node_modules archive bytes".to_vec();

        assert_eq!(manager.restore(&key).await, RestoreOutcome::Miss);
        assert!(matches!(
            manager.save(&key, &payload).await,
            SaveOutcome::Stored { .. }
        ));
        assert_eq!(manager.restore(&key).await, RestoreOutcome::Hit(payload));

        let stats = manager.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.uploads, 1);
    }

    #[tokio::test]
    async fn test_changed_manifest_misses() {
        let manager = CacheManager::new(Arc::new(MemoryStore::new()));
        manager.save(&key("v1"), b"old").await;
        assert_eq!(manager.restore(&key("v2")).await, RestoreOutcome::Miss);
    }

    #[tokio::test]
    async fn test_resave_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let manager = CacheManager::new(store.clone());
        let key = key("v1");

        manager.save(&key, b"first").await;
        assert_eq!(
            manager.save(&key, b"second").await,
            SaveOutcome::AlreadyPresent
        );
        assert_eq!(
            manager.restore(&key).await,
            RestoreOutcome::Hit(b"first".to_vec())
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_saves_store_once() {
        let manager = Arc::new(CacheManager::new(Arc::new(MemoryStore::new())));
        let key = key("v1");

        let mut handles = Vec::new();
        for i in 0..8 {
            let manager = manager.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                manager.save(&key, format!("payload {i}").as_bytes()).await
            }));
        }

        let mut stored = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), SaveOutcome::Stored { .. }) {
                stored += 1;
            }
        }
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_miss() {
        let manager = CacheManager::new(Arc::new(BrokenStore));
        let key = key("v1");
        assert_eq!(manager.restore(&key).await, RestoreOutcome::Miss);
        assert_eq!(manager.save(&key, b"data").await, SaveOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_entries_survive_codec_change() {
        let store = Arc::new(MemoryStore::new());
        let gzip = CacheManager::with_compression(store.clone(), CompressionType::Gzip);
        gzip.save(&key("v1"), b"bytes").await;

        let lz4 = CacheManager::with_compression(store, CompressionType::Lz4);
        assert_eq!(
            lz4.restore(&key("v1")).await,
            RestoreOutcome::Hit(b"bytes".to_vec())
        );
    }

    #[tokio::test]
    async fn test_clear_by_prefix() {
        let store = Arc::new(MemoryStore::new());
        let manager = CacheManager::new(store.clone());
        manager.save(&key("v1"), b"a").await;
        manager
            .save(&compute_key("cargo", &[]), b"b")
            .await;

        assert_eq!(manager.clear(Some("npm-")).await.unwrap(), 1);
        assert_eq!(manager.list(None).await.unwrap().len(), 1);
    }
}
