//! Local filesystem storage implementation.
//!
//! Records and the resume state are written to a temp file, synced and
//! renamed into place, so a reader sees either the old or the new artifact.
//! Backups and log entries are synced before the call returns.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{CorpusRecord, CorrectionLogEntry, ResumeState};
use crate::storage::CorpusStorage;
use crate::utils::record_key;

const RECORDS_DIR: &str = "records";
const RECOVERY_DIR: &str = "recovery";
const CORRECTION_LOG: &str = "correction_log.jsonl";
const RESUME_STATE: &str = "state.json";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    fn record_path_key(id: &str) -> String {
        format!("{}/{}.json", RECORDS_DIR, record_key(id))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, sync, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn write_backup(&self, record: &CorpusRecord) -> Result<String> {
        let key = Self::record_path_key(record.id());
        // Back up the artifact as stored, falling back to the in-memory copy.
        let bytes = match self.read_bytes(&key).await? {
            Some(bytes) => bytes,
            None => serde_json::to_vec_pretty(record)?,
        };

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%6fZ");
        let backup_key = format!("{}/{}.{}.json", RECOVERY_DIR, record_key(record.id()), stamp);
        let path = self.path(&backup_key);
        self.ensure_dir(&path).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        file.sync_all().await?;

        Ok(backup_key)
    }

    async fn write_log_line(&self, entry: &CorrectionLogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let path = self.path(CORRECTION_LOG);
        self.ensure_dir(&path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[async_trait]
impl CorpusStorage for LocalStorage {
    async fn write_record(&self, record: &CorpusRecord) -> Result<()> {
        self.write_json(&Self::record_path_key(record.id()), record)
            .await
            .map_err(|e| AppError::storage(record.id(), e))
    }

    async fn load_record(&self, id: &str) -> Result<Option<CorpusRecord>> {
        self.read_json(&Self::record_path_key(id)).await
    }

    async fn list_records(&self) -> Result<Vec<CorpusRecord>> {
        let dir = self.path(RECORDS_DIR);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<CorpusRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }

        records.sort_by(|a, b| a.work.id.cmp(&b.work.id));
        Ok(records)
    }

    async fn backup_record(&self, record: &CorpusRecord) -> Result<String> {
        self.write_backup(record)
            .await
            .map_err(|e| AppError::storage(format!("backup of {}", record.id()), e))
    }

    async fn append_correction(&self, entry: &CorrectionLogEntry) -> Result<()> {
        self.write_log_line(entry)
            .await
            .map_err(|e| AppError::storage(CORRECTION_LOG, e))
    }

    async fn load_correction_log(&self) -> Result<Vec<CorrectionLogEntry>> {
        let Some(bytes) = self.read_bytes(CORRECTION_LOG).await? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8_lossy(&bytes);
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(AppError::from))
            .collect()
    }

    async fn load_resume_state(&self) -> Result<ResumeState> {
        self.read_json(RESUME_STATE)
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| AppError::resume_state(e))
    }

    async fn save_resume_state(&self, state: &ResumeState) -> Result<()> {
        self.write_json(RESUME_STATE, state)
            .await
            .map_err(|e| AppError::resume_state(e))
    }
}
