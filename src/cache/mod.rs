//! Payload cache keyed by canonical page title.
//!
//! Entries carry their own freshness window. Staleness is checked when an
//! entry is read; nothing evicts in the background. A stale entry reads as a
//! miss exactly like an absent one.
//!
//! Both backends synchronise per key (or per shard), so a slow write to one
//! title never stalls a read of another.

mod file;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use file::FileCache;
pub use memory::MemoryCache;

/// A cached payload with the time it was fetched and how long it stays fresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: String,
    pub fetched_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn new(payload: impl Into<String>, ttl: Duration) -> Self {
        Self {
            payload: payload.into(),
            fetched_at: Utc::now(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Fresh while its age is strictly below the time-to-live.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.fetched_at);
        let ttl = chrono::Duration::milliseconds(i64::try_from(self.ttl_ms).unwrap_or(i64::MAX));
        age < ttl
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }
}

/// Key/value store for fetched payloads.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fresh payload for `key`, or `None` when absent or stale.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store `payload` under `key`, replacing any previous entry.
    async fn put(&self, key: &str, payload: &str, ttl: Duration) -> Result<()>;
}

/// Cache that never holds anything. Used when caching is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

#[async_trait]
impl CacheStore for NoCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn put(&self, _key: &str, _payload: &str, _ttl: Duration) -> Result<()> {
        Ok(())
    }
}
