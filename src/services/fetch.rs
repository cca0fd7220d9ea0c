// src/services/fetch.rs

//! Fetch client: read-through / write-through cache in front of a page source.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::cache::CacheStore;
use crate::error::FetchError;
use crate::services::PageSource;
use crate::utils::canonical_title;

/// Counters shared by every fetch of a run.
#[derive(Debug, Default)]
pub struct FetchMetrics {
    cache_hits: AtomicU64,
    network_calls: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Point-in-time copy of [`FetchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub cache_hits: u64,
    pub network_calls: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

impl FetchMetrics {
    pub fn snapshot(&self) -> FetchStats {
        FetchStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            network_calls: self.network_calls.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Acquire),
            peak_in_flight: self.peak_in_flight.load(Ordering::Acquire),
        }
    }

    fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a network call and hold the in-flight gauge until the guard drops.
    fn begin_request(&self) -> InFlightGuard<'_> {
        self.network_calls.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        InFlightGuard { metrics: self }
    }
}

struct InFlightGuard<'a> {
    metrics: &'a FetchMetrics,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Single-page retrieval with caching. Never retries; that is the scheduler's call.
#[derive(Clone)]
pub struct FetchClient {
    source: Arc<dyn PageSource>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    metrics: Arc<FetchMetrics>,
}

impl FetchClient {
    pub fn new(source: Arc<dyn PageSource>, cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            source,
            cache,
            ttl,
            metrics: Arc::new(FetchMetrics::default()),
        }
    }

    pub fn metrics(&self) -> &Arc<FetchMetrics> {
        &self.metrics
    }

    pub fn host(&self) -> &str {
        self.source.host()
    }

    /// Fresh cached payload, if any. Counts as a cache hit.
    pub async fn cached(&self, id: &str) -> Option<String> {
        let key = canonical_title(id);
        let payload = self.cache.get(&key).await?;
        self.metrics.record_hit();
        log::debug!("Cache hit: {}", key);
        Some(payload)
    }

    /// Network retrieval with write-through on success.
    pub async fn fetch_remote(&self, id: &str) -> Result<String, FetchError> {
        let key = canonical_title(id);
        let payload = {
            let _in_flight = self.metrics.begin_request();
            self.source.fetch_page(&key).await?
        };

        // A cache that cannot be written costs a refetch later, nothing more.
        if let Err(e) = self.cache.put(&key, &payload, self.ttl).await {
            log::warn!("Cache write failed for {}: {}", key, e);
        }
        Ok(payload)
    }

    /// Cache first, then network.
    pub async fn fetch(&self, id: &str) -> Result<String, FetchError> {
        if let Some(payload) = self.cached(id).await {
            return Ok(payload);
        }
        self.fetch_remote(id).await
    }
}
