// src/models/record.rs

//! Corpus records: the durable unit of output.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::WorkDescriptor;

/// Separator placed between chapters when a record is read as one payload.
pub const CHAPTER_SEPARATOR: &str = "\n\n";

/// Verdict of the index/content classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PageClassification {
    FullContent,
    IndexOnly,
    Ambiguous,
}

impl fmt::Display for PageClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FullContent => "full-content",
            Self::IndexOnly => "index-only",
            Self::Ambiguous => "ambiguous",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RecordStatus {
    Pending,
    Fetched,
    FetchedWithGaps,
    NeedsExpansion,
    Corrected,
    Failed,
}

impl RecordStatus {
    /// The record holds content a later run must not redo.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Fetched | Self::FetchedWithGaps | Self::Corrected)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Fetched => "fetched",
            Self::FetchedWithGaps => "fetched-with-gaps",
            Self::NeedsExpansion => "needs-expansion",
            Self::Corrected => "corrected",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a chapter slot holds no content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GapReason {
    /// Transient failures outlasted the attempt cap
    RetriesExhausted,
    /// Not found or malformed
    PermanentFailure,
    /// Nested index beyond the configured depth
    RecursionLimit,
    /// Fetched, but neither content nor an expandable index
    NotContent,
    /// Run shut down before the chapter was fetched
    Cancelled,
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RetriesExhausted => "retries exhausted",
            Self::PermanentFailure => "permanent failure",
            Self::RecursionLimit => "recursion limit",
            Self::NotContent => "not content",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One chapter slot of a record, in index order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chapter {
    /// Page the chapter was read from
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap: Option<GapReason>,
}

impl Chapter {
    pub fn content(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: Some(text.into()),
            gap: None,
        }
    }

    pub fn gap(id: impl Into<String>, reason: GapReason) -> Self {
        Self {
            id: id.into(),
            content: None,
            gap: Some(reason),
        }
    }

    pub fn is_gap(&self) -> bool {
        self.content.is_none()
    }
}

/// A persisted work: its chapters, status and last classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorpusRecord {
    pub work: WorkDescriptor,

    pub status: RecordStatus,

    /// Classification of the stored content; `None` when nothing is stored
    #[serde(default)]
    pub classification: Option<PageClassification>,

    /// Chapter sequence in index order (one entry for single-page works)
    #[serde(default)]
    pub chapters: Vec<Chapter>,

    /// Reason for `Failed`, kept for manual follow-up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl CorpusRecord {
    /// Fresh record that has not been fetched yet.
    pub fn pending(work: WorkDescriptor) -> Self {
        Self {
            work,
            status: RecordStatus::Pending,
            classification: None,
            chapters: Vec::new(),
            failure: None,
            updated_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.work.id
    }

    /// Record holding a single page of content.
    pub fn fetched(work: WorkDescriptor, payload: String) -> Self {
        let chapter = Chapter::content(work.id.clone(), payload);
        Self {
            work,
            status: RecordStatus::Fetched,
            classification: Some(PageClassification::FullContent),
            chapters: vec![chapter],
            failure: None,
            updated_at: Utc::now(),
        }
    }

    /// Mark the record failed; stored chapters are dropped.
    pub fn fail(mut self, reason: impl Into<String>) -> Self {
        self.status = RecordStatus::Failed;
        self.classification = None;
        self.chapters.clear();
        self.failure = Some(reason.into());
        self.touch();
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// All present chapter texts, joined in order.
    pub fn content(&self) -> String {
        self.chapters
            .iter()
            .filter_map(|c| c.content.as_deref())
            .collect::<Vec<_>>()
            .join(CHAPTER_SEPARATOR)
    }

    /// Chapters that hold no content.
    pub fn gaps(&self) -> impl Iterator<Item = &Chapter> {
        self.chapters.iter().filter(|c| c.is_gap())
    }

    pub fn has_gaps(&self) -> bool {
        self.gaps().next().is_some()
    }

    pub fn present_chapters(&self) -> usize {
        self.chapters.iter().filter(|c| !c.is_gap()).count()
    }
}
