// src/pipeline/scheduler.rs

//! Bounded-concurrency fetch scheduling.
//!
//! Every network attempt, for works and chapters alike, takes a permit from
//! one [`PriorityGate`], so the in-flight count never exceeds
//! `max_concurrent`. Chapters are served before fresh works so a started
//! expansion finishes first. Permits are held only around a single attempt;
//! waiting on backoff or on child chapters never holds one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::{Mutex, OnceCell, watch};
use tokio::time::Instant;

use crate::error::FetchError;
use crate::models::{
    Config, CorpusRecord, ExpansionConfig, FetchTask, PageClassification, RetryConfig,
    WorkDescriptor,
};
use crate::pipeline::expand::ChapterExpander;
use crate::pipeline::gate::PriorityGate;
use crate::services::markup::parse_redirect;
use crate::services::{CategoryMember, CategorySource, Classifier, FetchClient, chapters_of};

/// Exponential backoff with a cap and random jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);

        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            backoff
        } else {
            backoff + Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1))
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Minimum interval between requests to the same host.
#[derive(Debug)]
pub struct HostRateLimiter {
    interval: Duration,
    hosts: DashMap<String, Arc<Mutex<Option<Instant>>>>,
}

impl HostRateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            hosts: DashMap::new(),
        }
    }

    /// Wait until a request to `host` may be sent, and claim that slot.
    pub async fn wait(&self, host: &str) {
        if self.interval.is_zero() {
            return;
        }

        let slot = self
            .hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut last = slot.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Cooperative shutdown flag shared by every task of a run.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is triggered.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

type Listing = Arc<Vec<CategoryMember>>;

/// Turns work descriptors into classified, expanded corpus records.
pub struct FetchScheduler {
    client: FetchClient,
    classifier: Arc<dyn Classifier>,
    categories: Option<Arc<dyn CategorySource>>,
    /// Category listings fetched this run, shared by every work
    listings: DashMap<String, Arc<OnceCell<Listing>>>,
    permits: PriorityGate,
    limit: usize,
    rate_limiter: HostRateLimiter,
    retry: RetryPolicy,
    max_redirects: usize,
    expansion: ExpansionConfig,
    shutdown: ShutdownSignal,
}

impl FetchScheduler {
    pub fn new(client: FetchClient, classifier: Arc<dyn Classifier>, config: &Config) -> Self {
        let limit = config.crawler.max_concurrent.max(1);
        Self {
            client,
            classifier,
            categories: None,
            listings: DashMap::new(),
            permits: PriorityGate::new(limit),
            limit,
            rate_limiter: HostRateLimiter::new(config.crawler.request_delay()),
            retry: RetryPolicy::from_config(&config.retry),
            max_redirects: config.crawler.max_redirects,
            expansion: config.expansion.clone(),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Look up chapters in category listings when an index links nothing.
    pub fn with_categories(mut self, categories: Arc<dyn CategorySource>) -> Self {
        self.categories = Some(categories);
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn client(&self) -> &FetchClient {
        &self.client
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn expansion(&self) -> &ExpansionConfig {
        &self.expansion
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Resolve one task to a payload: cache, then network with retries,
    /// following redirects up to the configured number of hops.
    pub async fn fetch_task(&self, mut task: FetchTask) -> Result<String, FetchError> {
        let origin = task.target.clone();
        let mut hops = 0;

        loop {
            let payload = self.fetch_with_retry(&mut task).await?;

            let Some(target) = parse_redirect(&payload) else {
                return Ok(payload);
            };
            hops += 1;
            if hops > self.max_redirects {
                return Err(FetchError::permanent(
                    &origin,
                    format!("more than {} redirects", self.max_redirects),
                ));
            }
            log::debug!("{} redirects to {}", task.target, target);
            task = task.redirected(&target);
        }
    }

    async fn fetch_with_retry(&self, task: &mut FetchTask) -> Result<String, FetchError> {
        if let Some(payload) = self.client.cached(&task.target).await {
            return Ok(payload);
        }

        loop {
            if self.shutdown.is_triggered() {
                return Err(FetchError::cancelled(&task.target));
            }
            task.attempt += 1;

            let result = {
                let _permit = self
                    .permits
                    .acquire(task.priority)
                    .await
                    .ok_or_else(|| FetchError::cancelled(&task.target))?;
                self.rate_limiter.wait(self.client.host()).await;
                self.client.fetch_remote(&task.target).await
            };

            match result {
                Ok(payload) => return Ok(payload),
                Err(e) if e.is_transient() && task.attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(task.attempt);
                    log::debug!(
                        "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                        task.attempt,
                        self.retry.max_attempts,
                        task.target,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.triggered() => {
                            return Err(FetchError::cancelled(&task.target));
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Chapters of `work` filed under the configured chapter category.
    ///
    /// Walks subcategories up to `category_depth` levels. Listings are
    /// fetched once per run; a listing that cannot be fetched is skipped.
    pub async fn category_chapters(&self, work: &WorkDescriptor) -> Vec<String> {
        let (Some(source), Some(root)) = (&self.categories, self.expansion.category_root()) else {
            return Vec::new();
        };

        let mut members = Vec::new();
        let mut seen = HashSet::new();
        let mut frontier = vec![(root.to_string(), 0usize)];
        while let Some((category, depth)) = frontier.pop() {
            if !seen.insert(category.clone()) {
                continue;
            }
            let listing = match self.listing(source.as_ref(), &category).await {
                Ok(listing) => listing,
                Err(e) => {
                    log::debug!("No listing for {}: {}", category, e);
                    continue;
                }
            };
            for member in listing.iter() {
                if !member.is_category {
                    members.push(member.clone());
                } else if depth < self.expansion.category_depth {
                    frontier.push((member.title.clone(), depth + 1));
                }
            }
        }
        chapters_of(&work.id, &members)
    }

    async fn listing(
        &self,
        source: &dyn CategorySource,
        category: &str,
    ) -> Result<Listing, FetchError> {
        let cell = self
            .listings
            .entry(category.to_string())
            .or_default()
            .clone();

        cell.get_or_try_init(|| async {
            if self.shutdown.is_triggered() {
                return Err(FetchError::cancelled(category));
            }
            let _permit = self
                .permits
                .acquire(FetchTask::WORK_PRIORITY)
                .await
                .ok_or_else(|| FetchError::cancelled(category))?;
            self.rate_limiter.wait(source.host()).await;
            source.members(category).await.map(Arc::new)
        })
        .await
        .cloned()
    }

    /// Acquire one work: fetch, classify, and expand if it is an index.
    ///
    /// Never fails: problems end up in the record's status. A work abandoned
    /// by shutdown comes back `Pending` so a later run picks it up.
    pub async fn acquire(&self, work: &WorkDescriptor) -> CorpusRecord {
        if self.shutdown.is_triggered() {
            return CorpusRecord::pending(work.clone());
        }

        let payload = match self.fetch_task(FetchTask::for_work(work)).await {
            Ok(payload) => payload,
            Err(e) => return failure_record(work, e),
        };

        match self.classifier.classify(&payload, work) {
            PageClassification::FullContent => CorpusRecord::fetched(work.clone(), payload),
            verdict => {
                log::info!("{} is {}, expanding chapters", work.id, verdict);
                ChapterExpander::new(self).expand(work, &payload).await
            }
        }
    }

    /// Acquire many works concurrently; records arrive in completion order.
    pub fn acquire_all(
        self: &Arc<Self>,
        works: Vec<WorkDescriptor>,
    ) -> impl Stream<Item = CorpusRecord> + use<> {
        let scheduler = Arc::clone(self);
        let limit = self.limit;
        stream::iter(works)
            .map(move |work| {
                let scheduler = Arc::clone(&scheduler);
                async move { scheduler.acquire(&work).await }
            })
            .buffer_unordered(limit)
    }
}

/// Record for a work whose own page could not be fetched.
fn failure_record(work: &WorkDescriptor, error: FetchError) -> CorpusRecord {
    match error {
        FetchError::Cancelled { .. } => CorpusRecord::pending(work.clone()),
        FetchError::Transient { .. } => {
            log::warn!("Giving up on {}: {}", work.id, error);
            CorpusRecord::pending(work.clone()).fail(format!("retries exhausted: {}", error))
        }
        FetchError::Permanent { .. } => {
            log::warn!("Failed to fetch {}: {}", work.id, error);
            CorpusRecord::pending(work.clone()).fail(error.to_string())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::models::RecordStatus;
    use crate::testing::{MockSource, StubClassifier, latin_prose};

    /// Config with no waiting between attempts or requests.
    pub(crate) fn fast_config(max_concurrent: usize) -> Config {
        let mut config = Config::default();
        config.crawler.max_concurrent = max_concurrent;
        config.crawler.request_delay_ms = 0;
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 4;
        config.retry.jitter_ms = 0;
        config
    }

    pub(crate) fn scheduler(source: &Arc<MockSource>, config: &Config) -> FetchScheduler {
        let client = FetchClient::new(
            Arc::clone(source) as Arc<dyn crate::services::PageSource>,
            Arc::new(MemoryCache::new()),
            Duration::from_secs(60),
        );
        FetchScheduler::new(client, Arc::new(StubClassifier), config)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(3000),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(2000));
        assert_eq!(policy.delay(4), Duration::from_millis(3000));
        assert_eq!(policy.delay(40), Duration::from_millis(3000));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy {
            jitter: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let delay = policy.delay(1);
            assert!(delay >= policy.base_delay);
            assert!(delay <= policy.base_delay + Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_spaces_requests_per_host() {
        let limiter = HostRateLimiter::new(Duration::from_millis(250));
        let start = Instant::now();
        limiter.wait("la.wikisource.org").await;
        limiter.wait("la.wikisource.org").await;
        limiter.wait("la.wikisource.org").await;
        assert!(start.elapsed() >= Duration::from_millis(500));

        let other = Instant::now();
        limiter.wait("en.wikisource.org").await;
        assert!(other.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let source = Arc::new(MockSource::new());
        let transient = || Err(FetchError::transient("Germania", "HTTP 503"));
        source.script(
            "Germania",
            vec![transient(), transient(), transient(), Ok(latin_prose(300))],
        );
        let scheduler = scheduler(&source, &fast_config(4));

        let record = scheduler.acquire(&WorkDescriptor::new("Germania")).await;
        assert_eq!(record.status, RecordStatus::Fetched);
        assert_eq!(source.calls("Germania"), 4);
    }

    #[tokio::test]
    async fn test_always_transient_fails_after_cap() {
        let source = Arc::new(MockSource::new());
        source.flaky("Germania");
        let scheduler = scheduler(&source, &fast_config(4));

        let record = scheduler.acquire(&WorkDescriptor::new("Germania")).await;
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.classification, None);
        assert!(record.failure.unwrap().contains("retries exhausted"));
        assert_eq!(source.calls("Germania"), 5);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let source = Arc::new(MockSource::new());
        source.missing("Nusquam");
        let scheduler = scheduler(&source, &fast_config(4));

        let record = scheduler.acquire(&WorkDescriptor::new("Nusquam")).await;
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(source.calls("Nusquam"), 1);
    }

    #[tokio::test]
    async fn test_follows_redirects_up_to_limit() {
        let source = Arc::new(MockSource::new());
        source.page("Aeneid", "#REDIRECT [[Aeneis]]");
        source.page("Aeneis", latin_prose(300));
        source.page("Loop A", "#REDIRECT [[Loop B]]");
        source.page("Loop B", "#REDIRECT [[Loop C]]");
        source.page("Loop C", "#REDIRECT [[Loop A]]");
        let scheduler = scheduler(&source, &fast_config(4));

        let record = scheduler.acquire(&WorkDescriptor::new("Aeneid")).await;
        assert_eq!(record.status, RecordStatus::Fetched);
        assert_eq!(record.content(), latin_prose(300));

        let record = scheduler.acquire(&WorkDescriptor::new("Loop A")).await;
        assert_eq!(record.status, RecordStatus::Failed);
        assert!(record.failure.unwrap().contains("redirects"));
    }

    #[tokio::test]
    async fn test_concurrency_bound_under_load() {
        let source = Arc::new(MockSource::new().with_latency(1, 8));
        let works: Vec<WorkDescriptor> = (0..60)
            .map(|i| WorkDescriptor::new(format!("Opus {}", i)))
            .collect();
        for work in &works {
            source.page(&work.id, latin_prose(200));
        }
        let scheduler = Arc::new(scheduler(&source, &fast_config(3)));

        let records: Vec<CorpusRecord> = scheduler.acquire_all(works).collect().await;
        assert_eq!(records.len(), 60);
        assert!(records.iter().all(|r| r.status == RecordStatus::Fetched));
        assert!(source.peak_in_flight() <= 3);
        let stats = scheduler.client().metrics().snapshot();
        assert!(stats.peak_in_flight <= 3);
        assert_eq!(stats.network_calls, 60);
    }

    #[tokio::test]
    async fn test_shutdown_leaves_work_pending() {
        let source = Arc::new(MockSource::new());
        source.page("Germania", latin_prose(200));
        let shutdown = ShutdownSignal::new();
        let scheduler = scheduler(&source, &fast_config(2)).with_shutdown(shutdown.clone());

        shutdown.trigger();
        shutdown.triggered().await;
        let record = scheduler.acquire(&WorkDescriptor::new("Germania")).await;
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(source.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let source = Arc::new(MockSource::new());
        source.flaky("Germania");
        let mut config = fast_config(2);
        config.retry.base_delay_ms = 60_000;
        config.retry.max_delay_ms = 60_000;
        let shutdown = ShutdownSignal::new();
        let scheduler = scheduler(&source, &config).with_shutdown(shutdown.clone());

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.trigger();
        };
        let work = WorkDescriptor::new("Germania");
        let (record, _) = tokio::join!(scheduler.acquire(&work), stopper);
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(source.calls("Germania"), 1);
    }
}
