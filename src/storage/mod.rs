//! Storage abstractions for the persisted corpus.
//!
//! A corpus directory holds one artifact per record, the pre-repair backups
//! written by the correction pass, the append-only correction log and the
//! resume state of the acquisition pass.
//!
//! ## Directory Structure
//!
//! ```text
//! corpus/
//! ├── records/
//! │   └── <key>.json              # CorpusRecord
//! ├── recovery/
//! │   └── <key>.<timestamp>.json  # backups taken before a repair
//! ├── correction_log.jsonl        # CorrectionLogEntry per line
//! ├── state.json                  # ResumeState
//! ├── .harvest.lock               # RunLock while a pass is active
//! └── .cache/                     # FileCache
//! ```

pub mod local;
pub mod lock;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CorpusRecord, CorrectionLogEntry, ResumeState};

// Re-export for convenience
pub use local::LocalStorage;
pub use lock::RunLock;

/// Trait for corpus storage backends.
#[async_trait]
pub trait CorpusStorage: Send + Sync {
    /// Atomically write (or replace) a record.
    async fn write_record(&self, record: &CorpusRecord) -> Result<()>;

    /// Load one record by work identifier.
    async fn load_record(&self, id: &str) -> Result<Option<CorpusRecord>>;

    /// All stored records, ordered by work identifier.
    async fn list_records(&self) -> Result<Vec<CorpusRecord>>;

    /// Copy the stored artifact of `record` to the recovery area.
    ///
    /// Returns the backup location. The copy is durable when this returns.
    async fn backup_record(&self, record: &CorpusRecord) -> Result<String>;

    /// Append one entry to the correction log, durably.
    async fn append_correction(&self, entry: &CorrectionLogEntry) -> Result<()>;

    async fn load_correction_log(&self) -> Result<Vec<CorrectionLogEntry>>;

    /// Resume state; empty when none was saved yet.
    async fn load_resume_state(&self) -> Result<ResumeState>;

    async fn save_resume_state(&self, state: &ResumeState) -> Result<()>;
}
