// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Once-a-day pruning of old `.jsonl` files.
//!
//! Several processes may append to the same directory, so the sweep is guarded three ways:
//! an in-memory date, an on-disk marker holding the date of the last sweep, and an
//! exclusive lock on `{marker}.lock`. The marker is read again once the lock is held so
//! only the first process of the day deletes anything.

use chrono::{DateTime, Days, NaiveDate, Utc};
use regex::Regex;
use std::fs::{self, OpenOptions, TryLockError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

#[allow(clippy::expect_used)]
fn dated_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d{4}-\d{2}-\d{2})\.jsonl$").expect("dated file pattern is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Pruning is disabled or already ran today.
    Skipped,
    /// Another process holds the lock.
    Locked,
    Swept { deleted: usize },
}

#[derive(Debug)]
pub struct RetentionSweeper {
    directory: PathBuf,
    marker: PathBuf,
    lock: PathBuf,
    retention_days: u32,
    last_sweep: Option<NaiveDate>,
}

impl RetentionSweeper {
    #[must_use]
    pub fn new(directory: &Path, name: &str, retention_days: u32) -> Self {
        let marker = directory.join(format!(".{name}-last-prune"));
        let mut lock = marker.clone().into_os_string();
        lock.push(".lock");
        RetentionSweeper {
            directory: directory.to_path_buf(),
            marker,
            lock: PathBuf::from(lock),
            retention_days,
            last_sweep: None,
        }
    }

    #[must_use]
    pub fn marker_path(&self) -> &Path {
        &self.marker
    }

    /// Deletes files dated before `today - retention_days`, at most once per day.
    ///
    /// Several processes may share the directory. The sweep checks the in-memory date, then
    /// the marker file, then takes a non-blocking lock and re-reads the marker before
    /// deleting anything. The date of a file comes from its `YYYY-MM-DD.jsonl` suffix, or
    /// from its modification time when the name carries none.
    ///
    /// # Arguments
    ///
    /// * `today` - Current calendar day in UTC
    ///
    /// # Returns
    ///
    /// * [`SweepOutcome::Skipped`] - pruning is disabled or already ran today
    /// * [`SweepOutcome::Locked`] - another process holds the lock; retried on the next call
    /// * [`SweepOutcome::Swept`] - the number of files deleted
    ///
    /// # Errors
    ///
    /// Any I/O failure on the directory, the lock file or the marker. A file that cannot be
    /// deleted is logged and skipped.
    pub fn maybe_sweep(&mut self, today: NaiveDate) -> io::Result<SweepOutcome> {
        if self.retention_days == 0 || self.last_sweep == Some(today) {
            return Ok(SweepOutcome::Skipped);
        }
        if self.marker_date() == Some(today) {
            self.last_sweep = Some(today);
            return Ok(SweepOutcome::Skipped);
        }

        fs::create_dir_all(&self.directory)?;
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock)?;
        match lock.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                debug!("FILE | Retention sweep already running elsewhere, skipping");
                return Ok(SweepOutcome::Locked);
            }
            Err(TryLockError::Error(e)) => return Err(e),
        }

        let outcome = self.sweep_locked(today);
        lock.unlock()?;
        outcome
    }

    fn sweep_locked(&mut self, today: NaiveDate) -> io::Result<SweepOutcome> {
        if self.marker_date() == Some(today) {
            self.last_sweep = Some(today);
            return Ok(SweepOutcome::Skipped);
        }

        let cutoff = today
            .checked_sub_days(Days::new(u64::from(self.retention_days)))
            .unwrap_or(NaiveDate::MIN);
        let mut deleted = 0;
        for dir_entry in fs::read_dir(&self.directory)? {
            let path = match dir_entry {
                Ok(dir_entry) => dir_entry.path(),
                Err(e) => {
                    debug!("FILE | Unable to read directory entry: {e}");
                    continue;
                }
            };
            let Some(date) = file_date(&path) else {
                continue;
            };
            if date >= cutoff {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => debug!("FILE | Unable to delete {}: {e}", path.display()),
            }
        }

        fs::write(&self.marker, today.to_string())?;
        self.last_sweep = Some(today);
        debug!("FILE | Retention sweep deleted {deleted} file(s)");
        Ok(SweepOutcome::Swept { deleted })
    }

    fn marker_date(&self) -> Option<NaiveDate> {
        let content = fs::read_to_string(&self.marker).ok()?;
        content.trim().parse().ok()
    }
}

// The date in the file name wins; files without one fall back to their mtime.
fn file_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    if !name.ends_with(".jsonl") {
        return None;
    }
    if let Some(captures) = dated_file_pattern().captures(name) {
        if let Ok(date) = captures[1].parse::<NaiveDate>() {
            return Some(date);
        }
    }
    let modified = fs::metadata(path).and_then(|metadata| metadata.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified).date_naive())
}
