// src/cache/memory.rs

//! In-process cache backed by a sharded concurrent map.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::{CacheEntry, CacheStore};
use crate::error::Result;

/// Sharded in-memory cache.
///
/// `DashMap` locks one shard per operation, so lookups of unrelated keys
/// proceed in parallel and a write only touches its own shard.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a prepared entry, e.g. one with a backdated timestamp.
    pub fn put_entry(&self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key)?;
        if entry.is_fresh() {
            return Some(entry.payload.clone());
        }
        drop(entry);

        // Stale: drop it unless a fresh write raced in.
        self.entries.remove_if(key, |_, e| !e.is_fresh());
        None
    }

    async fn put(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_string(), CacheEntry::new(payload, ttl));
        Ok(())
    }
}
