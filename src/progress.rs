//! Progress store - durable resume cursor for an interrupted dispatch
//!
//! A record exists only while a run is incomplete. Saving a cursor at or past
//! the total removes the record, so "complete" and "never started" look the
//! same to the next invocation.

use crate::config::Config;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Persisted position of the next unprocessed recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(rename = "current_index")]
    pub cursor: usize,
    pub total: usize,
    pub timestamp: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.cursor)
    }

    /// Cursor to resume from, if this record belongs to a list of `total` contacts
    pub fn resume_cursor(&self, total: usize) -> Option<usize> {
        (self.total == total && self.cursor < total).then_some(self.cursor)
    }
}

/// File-backed store for a single progress record
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(config: &Config) -> Self {
        Self::at(&config.progress_file)
    }

    pub fn at(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Load the saved record; a missing file means no prior run
    pub fn load(&self) -> Result<Option<ProgressRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: ProgressRecord = serde_json::from_str(&content)?;
        if record.cursor > record.total {
            return Err(Error::Parse(format!(
                "progress cursor {} exceeds total {}",
                record.cursor, record.total
            )));
        }
        Ok(Some(record))
    }

    /// Save the cursor atomically, or delete the record once `cursor >= total`
    pub fn save(&self, cursor: usize, total: usize) -> Result<()> {
        if cursor >= total {
            self.clear()?;
            return Ok(());
        }

        let record = ProgressRecord {
            cursor,
            total,
            timestamp: Utc::now(),
        };

        let parent = self.path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;

        // Write to temp file in same directory (for atomic rename)
        let mut temp = NamedTempFile::new_in(parent)?;
        let json = serde_json::to_string_pretty(&record)?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;

        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        Ok(())
    }

    /// Remove any saved record; returns whether one existed
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Take the exclusive writer lock for this record
    ///
    /// Fails closed if another dispatcher (in this or another process) holds it.
    pub fn lock(&self) -> Result<ProgressLock> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::ProgressLocked(lock_path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;

        Ok(ProgressLock { path: lock_path })
    }

    /// Remove a lock left behind by a crashed process
    pub fn break_lock(&self) -> Result<bool> {
        match fs::remove_file(self.lock_path()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Held for the duration of a run; removes the lock file on drop
#[derive(Debug)]
pub struct ProgressLock {
    path: PathBuf,
}

impl Drop for ProgressLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to release progress lock {}: {}", self.path.display(), e);
        }
    }
}
