// src/pipeline/acquire.rs

//! Acquisition pass: catalog in, records and resume state out.

use std::sync::Arc;

use futures::StreamExt;

use crate::error::Result;
use crate::models::{Catalog, CorpusRecord, RecordStatus, WorkDescriptor};
use crate::pipeline::scheduler::FetchScheduler;
use crate::pipeline::summary::RunSummary;
use crate::storage::{CorpusStorage, RunLock};

#[derive(Debug, Clone, Copy, Default)]
pub struct AcquireOptions {
    /// Retry works a previous run marked `Failed`
    pub retry_failed: bool,
}

/// Acquire every catalog work an earlier run has not finished.
///
/// Records are written as they complete and the resume state is saved after
/// each one, so an interrupted run loses at most the works in flight. A work
/// whose stored record is already complete is not fetched again, even when
/// the resume state does not know it. Only a resume-state failure aborts the
/// run.
pub async fn run_acquisition(
    scheduler: Arc<FetchScheduler>,
    storage: &dyn CorpusStorage,
    catalog: &Catalog,
    options: AcquireOptions,
    _lock: &RunLock,
) -> Result<RunSummary> {
    let mut state = storage.load_resume_state().await?;
    let mut summary = RunSummary::default();

    let mut todo: Vec<WorkDescriptor> = Vec::new();
    for work in &catalog.works {
        if state.should_skip(&work.id, options.retry_failed) {
            summary.skipped += 1;
            continue;
        }
        match stored_status(storage, work).await {
            Stored::Complete(status) => {
                // Finished by a run whose resume state was lost.
                log::debug!("{} already stored as {}", work.id, status);
                state.set(&work.id, status);
                summary.skipped += 1;
            }
            Stored::Replaceable => todo.push(work.clone()),
            Stored::Unsafe(reason) => {
                log::error!("Leaving {} pending: {}", work.id, reason);
                state.set(&work.id, RecordStatus::Pending);
                summary.pending.push(work.id.clone());
            }
        }
    }

    log::info!(
        "Acquiring {} of {} works ({} already done)",
        todo.len(),
        catalog.len(),
        summary.skipped
    );
    for work in &todo {
        state.set(&work.id, RecordStatus::Pending);
    }
    storage.save_resume_state(&state).await?;

    let mut records = scheduler.acquire_all(todo);
    while let Some(record) = records.next().await {
        let mut status = record.status;

        if matches!(status, RecordStatus::Pending | RecordStatus::NeedsExpansion) {
            // Abandoned by shutdown: nothing to store, the next run redoes it.
            status = RecordStatus::Pending;
        } else if let Err(e) = storage.write_record(&record).await {
            log::error!("Could not store {}: {}", record.id(), e);
            summary.pending.push(record.id().to_string());
            status = RecordStatus::Pending;
            state.set(record.id(), status);
            storage.save_resume_state(&state).await?;
            continue;
        } else {
            log::info!("Stored {} ({})", record.id(), status);
        }

        summary.record(&record);
        state.set(record.id(), status);
        storage.save_resume_state(&state).await?;
    }

    summary.add_fetch_stats(scheduler.client().metrics().snapshot());
    Ok(summary)
}

/// What is stored for a work about to be acquired.
enum Stored {
    /// A finished record; never replaced by acquisition
    Complete(RecordStatus),
    /// Nothing, or an unfinished record
    Replaceable,
    /// An artifact that could not be read or backed up
    Unsafe(String),
}

async fn stored_status(storage: &dyn CorpusStorage, work: &WorkDescriptor) -> Stored {
    match storage.load_record(&work.id).await {
        Ok(Some(record)) if record.status.is_complete() => Stored::Complete(record.status),
        Ok(_) => Stored::Replaceable,
        Err(e) => {
            // Unreadable: keep a copy of the bytes before a new record lands.
            log::warn!("Stored record of {} is unreadable: {}", work.id, e);
            match storage
                .backup_record(&CorpusRecord::pending(work.clone()))
                .await
            {
                Ok(location) => {
                    log::info!("Backed up unreadable {} to {}", work.id, location);
                    Stored::Replaceable
                }
                Err(e) => Stored::Unsafe(e.to_string()),
            }
        }
    }
}
