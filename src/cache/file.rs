// src/cache/file.rs

//! Persistent cache: one JSON file per key under a cache directory.
//!
//! ## Layout
//!
//! ```text
//! {dir}/
//! └── <sha256(key)>.json    # CacheEntry
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::cache::{CacheEntry, CacheStore};
use crate::error::Result;

/// File-backed cache with one reader/writer lock per key.
///
/// Readers of a key share its lock; a writer holds it exclusively while the
/// entry is written to a temp file and renamed into place. Locks for other
/// keys are never touched. A key's lock is dropped from the map once no task
/// uses it.
#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl FileCache {
    /// Open (and create if needed) a cache directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            locks: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lock guarding one key. Created on first use.
    fn lock_for(&self, key: &str) -> Arc<RwLock<()>> {
        // Clone the Arc out so the map shard is released before awaiting.
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Give back a lock from [`lock_for`](Self::lock_for), pruning it when
    /// the map holds the last reference.
    fn release(&self, key: &str, lock: Arc<RwLock<()>>) {
        drop(lock);
        // Runs under the shard lock, so no `lock_for` can clone it meanwhile.
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    async fn write_entry(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        let path = self.entry_path(key);
        let tmp = path.with_extension("tmp");
        let bytes = serde_json::to_vec(&CacheEntry::new(payload, ttl))?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    async fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::debug!("Cache read failed for {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("Ignoring corrupt cache entry {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[async_trait]
impl CacheStore for FileCache {
    async fn get(&self, key: &str) -> Option<String> {
        let lock = self.lock_for(key);
        let entry = {
            let _guard = lock.read().await;
            self.read_entry(key).await
        };
        self.release(key, lock);

        let entry = entry?;
        entry.is_fresh().then_some(entry.payload)
    }

    async fn put(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        let lock = self.lock_for(key);
        let result = {
            let _guard = lock.write().await;
            self.write_entry(key, payload, ttl).await
        };
        self.release(key, lock);
        result
    }
}
