// src/pipeline/summary.rs

//! End-of-run report.

use serde::Serialize;

use crate::models::{CorpusRecord, RecordStatus};
use crate::services::FetchStats;

/// Counts and identifiers of everything a pass did.
///
/// Gapped and failed works are listed by identifier for manual follow-up.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    /// Works stored with missing chapters: (work, missing chapter ids)
    pub fetched_with_gaps: Vec<(String, Vec<String>)>,
    pub corrected: Vec<String>,
    /// Works that failed, with the reason
    pub failed: Vec<(String, String)>,
    /// Works left for a later run (shutdown or storage trouble)
    pub pending: Vec<String>,
    /// Works skipped because an earlier run finished them
    pub skipped: usize,
    /// Records the correction pass found already correct
    pub unchanged: usize,
    pub cache_hits: u64,
    pub network_calls: u64,
}

impl RunSummary {
    /// Count one record by its final status.
    pub fn record(&mut self, record: &CorpusRecord) {
        let id = record.id().to_string();
        match record.status {
            RecordStatus::Fetched => self.fetched += 1,
            RecordStatus::FetchedWithGaps => {
                let gaps = record.gaps().map(|c| c.id.clone()).collect();
                self.fetched_with_gaps.push((id, gaps));
            }
            RecordStatus::Corrected => self.corrected.push(id),
            RecordStatus::Failed => {
                let reason = record.failure.clone().unwrap_or_else(|| "unknown".into());
                self.failed.push((id, reason));
            }
            RecordStatus::Pending | RecordStatus::NeedsExpansion => self.pending.push(id),
        }
    }

    pub fn fail(&mut self, id: impl Into<String>, reason: impl Into<String>) {
        self.failed.push((id.into(), reason.into()));
    }

    pub fn add_fetch_stats(&mut self, stats: FetchStats) {
        self.cache_hits += stats.cache_hits;
        self.network_calls += stats.network_calls;
    }

    /// Nothing was written or repaired.
    pub fn is_noop(&self) -> bool {
        self.fetched == 0
            && self.fetched_with_gaps.is_empty()
            && self.corrected.is_empty()
            && self.failed.is_empty()
    }

    pub fn log_report(&self, pass: &str) {
        log::info!(
            "{} finished: {} fetched, {} with gaps, {} corrected, {} failed, {} pending, {} skipped, {} unchanged",
            pass,
            self.fetched,
            self.fetched_with_gaps.len(),
            self.corrected.len(),
            self.failed.len(),
            self.pending.len(),
            self.skipped,
            self.unchanged
        );
        log::info!(
            "Network calls: {}, cache hits: {}",
            self.network_calls,
            self.cache_hits
        );
        for (id, gaps) in &self.fetched_with_gaps {
            log::warn!("Gaps in {}: {}", id, gaps.join(", "));
        }
        for (id, reason) in &self.failed {
            log::warn!("Failed: {} ({})", id, reason);
        }
        if !self.pending.is_empty() {
            log::info!("{} works left for the next run", self.pending.len());
        }
    }
}
