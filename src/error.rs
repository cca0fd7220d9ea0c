// src/error.rs

//! Unified error handling for the harvester.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built or used
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Another run holds the corpus lock
    #[error("Corpus is locked by another run ({path}); remove the lock file if no run is active")]
    Locked { path: PathBuf },

    /// Writing a record, backup or log entry failed
    #[error("Storage error for {context}: {message}")]
    Storage { context: String, message: String },

    /// The resume-state file could not be read or written
    #[error("Resume state error: {0}")]
    ResumeState(String),

    /// A fetch failed after classification
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a storage error with context.
    pub fn storage(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Storage {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a resume-state error.
    pub fn resume_state(message: impl fmt::Display) -> Self {
        Self::ResumeState(message.to_string())
    }
}

/// Outcome of a failed retrieval, classified for the retry decision.
///
/// The fetch client only classifies; the scheduler decides whether to retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Timeout, connection reset, 5xx or 429. Worth retrying.
    #[error("transient failure fetching '{id}': {reason}")]
    Transient { id: String, reason: String },

    /// Not found, malformed response, redirect loop. Never retried.
    #[error("permanent failure fetching '{id}': {reason}")]
    Permanent { id: String, reason: String },

    /// Abandoned because the run is shutting down.
    #[error("fetch of '{id}' cancelled by shutdown")]
    Cancelled { id: String },
}

impl FetchError {
    pub fn transient(id: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Transient {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn permanent(id: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Permanent {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn cancelled(id: impl Into<String>) -> Self {
        Self::Cancelled { id: id.into() }
    }

    /// Whether the caller may retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Identifier the failure refers to.
    pub fn id(&self) -> &str {
        match self {
            Self::Transient { id, .. } | Self::Permanent { id, .. } | Self::Cancelled { id } => id,
        }
    }
}
