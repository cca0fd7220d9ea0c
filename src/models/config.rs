//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP and fetch behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Retry and backoff policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Payload cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Index/content classifier thresholds
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Chapter expansion settings
    #[serde(default)]
    pub expansion: ExpansionConfig,

    /// Input file locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::validation("crawler.max_concurrent must be > 0"));
        }
        if url::Url::parse(&self.crawler.endpoint).is_err() {
            return Err(AppError::validation(format!(
                "crawler.endpoint is not a valid URL: {}",
                self.crawler.endpoint
            )));
        }
        if url::Url::parse(&self.crawler.api_endpoint).is_err() {
            return Err(AppError::validation(format!(
                "crawler.api_endpoint is not a valid URL: {}",
                self.crawler.api_endpoint
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::validation("retry.max_attempts must be > 0"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(AppError::validation(
                "retry.base_delay_ms must not exceed retry.max_delay_ms",
            ));
        }
        if self.classifier.full_content_words < self.classifier.min_prose_words {
            return Err(AppError::validation(
                "classifier.full_content_words must be >= classifier.min_prose_words",
            ));
        }
        if !(0.0..=1.0).contains(&self.classifier.max_link_ratio)
            || !(0.0..=1.0).contains(&self.classifier.low_link_ratio)
        {
            return Err(AppError::validation(
                "classifier link ratios must be within 0.0..=1.0",
            ));
        }
        if self.classifier.low_link_ratio > self.classifier.max_link_ratio {
            return Err(AppError::validation(
                "classifier.low_link_ratio must be <= classifier.max_link_ratio",
            ));
        }
        if self.expansion.max_depth == 0 {
            return Err(AppError::validation("expansion.max_depth must be > 0"));
        }
        Ok(())
    }
}

/// HTTP client and fetch behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Base URL of the raw-wikitext export endpoint
    #[serde(default = "defaults::endpoint")]
    pub endpoint: String,

    /// MediaWiki API used for category listings
    #[serde(default = "defaults::api_endpoint")]
    pub api_endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Minimum interval between two requests to the same host, in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Maximum concurrent in-flight requests
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Redirect pages followed before giving up
    #[serde(default = "defaults::max_redirects")]
    pub max_redirects: usize,
}

impl CrawlerConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            endpoint: defaults::endpoint(),
            api_endpoint: defaults::api_endpoint(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            max_concurrent: defaults::max_concurrent(),
            max_redirects: defaults::max_redirects(),
        }
    }
}

/// Retry policy for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per fetch, the first one included
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles on every further attempt
    #[serde(default = "defaults::base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay
    #[serde(default = "defaults::max_delay")]
    pub max_delay_ms: u64,

    /// Random jitter added to each delay
    #[serde(default = "defaults::jitter")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay(),
            max_delay_ms: defaults::max_delay(),
            jitter_ms: defaults::jitter(),
        }
    }
}

/// Payload cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Persist fetched payloads between runs
    #[serde(default = "defaults::cache_enabled")]
    pub enabled: bool,

    /// Freshness window in seconds
    #[serde(default = "defaults::cache_ttl")]
    pub ttl_secs: u64,

    /// Cache directory, relative to the output directory
    #[serde(default = "defaults::cache_dir")]
    pub dir: PathBuf,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::cache_enabled(),
            ttl_secs: defaults::cache_ttl(),
            dir: defaults::cache_dir(),
        }
    }
}

/// Named thresholds of the index/content classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Below this many prose words a page may be an index
    #[serde(default = "defaults::min_prose_words")]
    pub min_prose_words: usize,

    /// At or above this many prose words a page is comfortably content
    #[serde(default = "defaults::full_content_words")]
    pub full_content_words: usize,

    /// Above this link ratio a short page is an index
    #[serde(default = "defaults::max_link_ratio")]
    pub max_link_ratio: f64,

    /// At or below this link ratio a long page is content
    #[serde(default = "defaults::low_link_ratio")]
    pub low_link_ratio: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_prose_words: defaults::min_prose_words(),
            full_content_words: defaults::full_content_words(),
            max_link_ratio: defaults::max_link_ratio(),
            low_link_ratio: defaults::low_link_ratio(),
        }
    }
}

/// Chapter expansion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    /// Nested index levels expanded before a slot is given up
    #[serde(default = "defaults::max_depth")]
    pub max_depth: usize,

    /// Template for synthesised chapter titles (`{work}`, `{n}`, `{roman}`)
    #[serde(default = "defaults::fallback_pattern")]
    pub fallback_pattern: String,

    /// Category whose members include chapter pages; empty disables lookup
    #[serde(default = "defaults::chapter_category")]
    pub chapter_category: Option<String>,

    /// Subcategory levels walked below `chapter_category`
    #[serde(default = "defaults::category_depth")]
    pub category_depth: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            max_depth: defaults::max_depth(),
            fallback_pattern: defaults::fallback_pattern(),
            chapter_category: defaults::chapter_category(),
            category_depth: defaults::category_depth(),
        }
    }
}

impl ExpansionConfig {
    /// Root of the chapter category walk, if the lookup is enabled.
    pub fn category_root(&self) -> Option<&str> {
        self.chapter_category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// Input file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Work catalog (JSON list of work descriptors)
    #[serde(default = "defaults::catalog")]
    pub catalog: PathBuf,

    /// Optional list of known multi-chapter works, one title per line
    #[serde(default)]
    pub known_works: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            catalog: defaults::catalog(),
            known_works: None,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; vicifons-harvester/0.1)".into()
    }
    pub fn endpoint() -> String {
        "https://la.wikisource.org/w/index.php".into()
    }
    pub fn api_endpoint() -> String {
        "https://la.wikisource.org/w/api.php".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        250
    }
    pub fn max_concurrent() -> usize {
        10
    }
    pub fn max_redirects() -> usize {
        2
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        5
    }
    pub fn base_delay() -> u64 {
        500
    }
    pub fn max_delay() -> u64 {
        30_000
    }
    pub fn jitter() -> u64 {
        100
    }

    // Cache defaults
    pub fn cache_enabled() -> bool {
        true
    }
    pub fn cache_ttl() -> u64 {
        12 * 60 * 60
    }
    pub fn cache_dir() -> PathBuf {
        PathBuf::from(".cache")
    }

    // Classifier defaults
    pub fn min_prose_words() -> usize {
        50
    }
    pub fn full_content_words() -> usize {
        150
    }
    pub fn max_link_ratio() -> f64 {
        0.5
    }
    pub fn low_link_ratio() -> f64 {
        0.2
    }

    // Expansion defaults
    pub fn max_depth() -> usize {
        2
    }
    pub fn fallback_pattern() -> String {
        "{work}/Liber {roman}".into()
    }
    pub fn chapter_category() -> Option<String> {
        Some("Categoria:Capita ex operibus".into())
    }
    pub fn category_depth() -> usize {
        2
    }

    // Paths
    pub fn catalog() -> PathBuf {
        PathBuf::from("catalog.json")
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
