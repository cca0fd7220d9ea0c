//! Run-level mutual exclusion for a corpus directory.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{AppError, Result};

pub const LOCK_FILE: &str = ".harvest.lock";

/// Exclusive lock on a corpus directory, released on drop.
///
/// The lock is a file created with `create_new`, so two processes can never
/// both hold it. A crashed run leaves the file behind; it must be removed by
/// hand.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(dir: impl AsRef<Path>) -> Result<Self> {
        Self::acquire_with(dir, |file| {
            writeln!(file, "pid={} since={}", std::process::id(), Utc::now().to_rfc3339())
        })
    }

    fn acquire_with(
        dir: impl AsRef<Path>,
        write_owner: impl FnOnce(&mut File) -> io::Result<()>,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(AppError::Locked { path });
            }
            Err(e) => return Err(AppError::Io(e)),
        };
        // Owned from here on: a failed write below drops and removes it.
        let lock = Self { path };
        if let Err(e) = write_owner(&mut file) {
            drop(file);
            return Err(AppError::Io(e));
        }

        log::debug!("Acquired run lock {}", lock.path.display());
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether some run currently holds the lock on `dir`.
    pub fn is_held(dir: impl AsRef<Path>) -> bool {
        dir.as_ref().join(LOCK_FILE).exists()
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Could not remove run lock {}: {}", self.path.display(), e);
        }
    }
}
