// src/models/correction.rs

//! Correction log entries and the resume state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::RecordStatus;

/// What the correction pass did to a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorrectionAction {
    /// Replace a stored index with its expanded chapters
    ExpandIndex { chapter_targets: usize },
    /// The repair could not finish; the stored record was left as it was
    Aborted { reason: String },
}

/// Audit entry for one repair step. Appended once, never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrectionLogEntry {
    pub work_id: String,
    /// Where the pre-repair artifact was copied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
    pub action: CorrectionAction,
    /// Digest of the stored content the entry refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CorrectionLogEntry {
    pub fn new(work_id: impl Into<String>, action: CorrectionAction) -> Self {
        Self {
            work_id: work_id.into(),
            backup: None,
            action,
            content_digest: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_backup(mut self, backup: impl Into<String>) -> Self {
        self.backup = Some(backup.into());
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.content_digest = Some(digest.into());
        self
    }

    pub fn is_abort(&self) -> bool {
        matches!(self.action, CorrectionAction::Aborted { .. })
    }
}

/// Status of every work the acquisition pass has seen, keyed by identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResumeState {
    #[serde(default)]
    pub works: BTreeMap<String, RecordStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ResumeState {
    pub fn get(&self, id: &str) -> Option<RecordStatus> {
        self.works.get(id).copied()
    }

    pub fn set(&mut self, id: impl Into<String>, status: RecordStatus) {
        self.works.insert(id.into(), status);
        self.updated_at = Some(Utc::now());
    }

    /// Whether a run should skip this work.
    pub fn should_skip(&self, id: &str, retry_failed: bool) -> bool {
        match self.get(id) {
            Some(status) if status.is_complete() => true,
            Some(RecordStatus::Failed) => !retry_failed,
            _ => false,
        }
    }

    /// Number of works per status.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for status in self.works.values() {
            *counts.entry(status.to_string()).or_insert(0) += 1;
        }
        counts
    }
}
