// src/pipeline/correct.rs

//! Correction pass over a persisted corpus.
//!
//! Every complete record is reclassified from its stored content. Records
//! that turn out to be indices are repaired: the stored artifact is backed
//! up, the repair is logged, the chapters are fetched and the record is
//! replaced in one atomic write. A repair that cannot finish leaves the
//! original record and its backup in place and logs the abort once; later
//! passes skip the record until its stored content changes.

use std::collections::HashMap;

use crate::error::Result;
use crate::models::{
    CorpusRecord, CorrectionAction, CorrectionLogEntry, FetchTask, GapReason, PageClassification,
    RecordStatus,
};
use crate::pipeline::expand::ChapterExpander;
use crate::pipeline::scheduler::FetchScheduler;
use crate::pipeline::summary::RunSummary;
use crate::services::markup::chapter_links;
use crate::storage::{CorpusStorage, RunLock};
use crate::utils::content_digest;

#[derive(Debug, Clone, Copy, Default)]
pub struct CorrectOptions {
    /// Retry records whose last repair was aborted
    pub retry_aborted: bool,
}

/// Outcome of one attempted repair.
#[derive(Debug)]
enum Repair {
    Corrected(CorpusRecord),
    /// Gave up for a reason a rerun would meet again; logged
    Aborted(String),
    /// Gave up for a passing reason; the next pass tries again
    Deferred(String),
}

/// Reclassify every stored record and repair the index-only ones.
///
/// Failures are per record; only an unreadable corpus aborts the pass.
pub async fn run_correction(
    scheduler: &FetchScheduler,
    storage: &dyn CorpusStorage,
    options: CorrectOptions,
    _lock: &RunLock,
) -> Result<RunSummary> {
    let records = storage.list_records().await?;
    let history = storage.load_correction_log().await?;
    let mut latest: HashMap<&str, &CorrectionLogEntry> = HashMap::new();
    for entry in &history {
        latest.insert(entry.work_id.as_str(), entry);
    }

    let mut summary = RunSummary::default();
    log::info!("Checking {} stored records", records.len());

    for record in records {
        if scheduler.shutdown().is_triggered() {
            log::info!("Shutdown requested, stopping correction");
            break;
        }
        if !record.status.is_complete() {
            summary.skipped += 1;
            continue;
        }

        let content = record.content();
        let verdict = scheduler.classifier().classify(&content, &record.work);
        if verdict == PageClassification::FullContent {
            summary.unchanged += 1;
            continue;
        }

        let digest = content_digest(&content);
        let aborted_before = latest.get(record.id()).filter(|entry| {
            entry.is_abort() && entry.content_digest.as_deref() == Some(digest.as_str())
        });
        if let (Some(entry), false) = (aborted_before, options.retry_aborted) {
            log::info!(
                "Skipping {}: repair aborted at {} and the record is unchanged",
                record.id(),
                entry.timestamp
            );
            summary.skipped += 1;
            continue;
        }

        log::info!("{} is stored as {}, repairing", record.id(), verdict);
        let id = record.id().to_string();
        match repair(scheduler, storage, record, &digest).await {
            Ok(Repair::Corrected(corrected)) => summary.record(&corrected),
            Ok(Repair::Aborted(reason)) => {
                log::warn!("Repair of {} aborted: {}", id, reason);
                summary.fail(id, reason);
            }
            Ok(Repair::Deferred(reason)) => {
                log::warn!("Repair of {} deferred: {}", id, reason);
                summary.pending.push(id);
            }
            Err(e) => {
                log::error!("Repair of {} failed: {}", id, e);
                summary.fail(id, e.to_string());
            }
        }
    }

    summary.add_fetch_stats(scheduler.client().metrics().snapshot());
    Ok(summary)
}

async fn repair(
    scheduler: &FetchScheduler,
    storage: &dyn CorpusStorage,
    record: CorpusRecord,
    digest: &str,
) -> Result<Repair> {
    let expander = ChapterExpander::new(scheduler);
    let stored = record.content();

    let mut targets = chapter_links(&stored, &record.work.id);
    if targets.is_empty() {
        log::info!("Stored index of {} links nothing, refetching", record.id());
        let payload = match scheduler
            .fetch_task(FetchTask::for_work(&record.work))
            .await
        {
            Ok(fresh) => fresh,
            Err(e) if e.is_transient() || e.is_cancelled() => {
                return Ok(Repair::Deferred(e.to_string()));
            }
            Err(e) => {
                log::warn!("Refetch of {} failed: {}", record.id(), e);
                stored
            }
        };
        targets = expander.chapter_targets(&record.work, &payload).await;
    }
    if targets.is_empty() {
        return abort(storage, &record, None, digest, "index lists no chapters").await;
    }

    let backup = storage.backup_record(&record).await?;
    log::debug!("Backed up {} to {}", record.id(), backup);

    let entry = CorrectionLogEntry::new(
        record.id(),
        CorrectionAction::ExpandIndex {
            chapter_targets: targets.len(),
        },
    )
    .with_backup(&backup)
    .with_digest(digest);
    storage.append_correction(&entry).await?;

    let mut expanded = expander.expand_targets(&record.work, targets).await;
    match expanded.status {
        RecordStatus::Fetched | RecordStatus::FetchedWithGaps => {}
        RecordStatus::Pending | RecordStatus::NeedsExpansion => {
            return Ok(Repair::Deferred("interrupted by shutdown".into()));
        }
        _ => {
            let reason = expanded
                .failure
                .take()
                .unwrap_or_else(|| format!("expansion ended {}", expanded.status));
            if expanded
                .gaps()
                .any(|c| c.gap == Some(GapReason::RetriesExhausted))
            {
                return Ok(Repair::Deferred(reason));
            }
            return abort(storage, &record, Some(&backup), digest, reason).await;
        }
    }

    expanded.status = RecordStatus::Corrected;
    expanded.touch();
    storage.write_record(&expanded).await?;
    log::info!(
        "Corrected {}: {} chapters, {} missing",
        expanded.id(),
        expanded.present_chapters(),
        expanded.gaps().count()
    );
    Ok(Repair::Corrected(expanded))
}

/// Log an aborted repair so later passes leave the record alone.
async fn abort(
    storage: &dyn CorpusStorage,
    record: &CorpusRecord,
    backup: Option<&str>,
    digest: &str,
    reason: impl Into<String>,
) -> Result<Repair> {
    let reason = reason.into();
    let mut entry = CorrectionLogEntry::new(
        record.id(),
        CorrectionAction::Aborted {
            reason: reason.clone(),
        },
    )
    .with_digest(digest);
    if let Some(backup) = backup {
        entry = entry.with_backup(backup);
    }
    storage.append_correction(&entry).await?;
    Ok(Repair::Aborted(reason))
}
