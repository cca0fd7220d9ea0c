// src/models/mod.rs

//! Domain models for the harvester.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod correction;
mod record;
mod work;

// Re-export all public types
pub use config::{
    CacheConfig, ClassifierConfig, Config, CrawlerConfig, ExpansionConfig, LoggingConfig,
    PathsConfig, RetryConfig,
};
pub use correction::{CorrectionAction, CorrectionLogEntry, ResumeState};
pub use record::{
    CHAPTER_SEPARATOR, Chapter, CorpusRecord, GapReason, PageClassification, RecordStatus,
};
pub use work::{Catalog, FetchTask, WorkDescriptor};
