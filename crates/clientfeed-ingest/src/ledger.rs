//! Bounded error ledger with write-behind spill
//!
//! Keeps the most recent [`ValidationError`]s in a fixed-capacity FIFO window.
//! When the window is full the oldest entry is evicted, appended as one JSON
//! line to the per-file spill log, and only then is the new entry admitted.
//! Memory stays O(capacity) no matter how many lines of a file are rejected;
//! the complete history of a file is the spill log followed by the window.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use clientfeed_common::Result;
use tracing::warn;

use crate::output::AppendLog;
use crate::stats::ValidationError;

/// Default number of errors kept in memory per file
pub const DEFAULT_MAX_ERRORS_IN_MEMORY: usize = 1000;

/// Evictions between "memory limit reached" warnings
const EVICTION_WARN_EVERY: u64 = 100;

/// Spill log location for a given inbound file name
pub fn spill_path(errors_dir: &Path, file_name: &str) -> PathBuf {
    errors_dir.join(format!("errors_{file_name}.log"))
}

pub struct ErrorLedger {
    capacity: usize,
    window: VecDeque<ValidationError>,
    omitted: u64,
    sink: AppendLog,
}

impl ErrorLedger {
    /// A capacity of zero is treated as one
    pub fn new(capacity: usize, spill_path: PathBuf) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            window: VecDeque::with_capacity(capacity),
            omitted: 0,
            sink: AppendLog::new(spill_path),
        }
    }

    /// Admit `errors` in order, evicting the oldest entries to disk as needed
    ///
    /// Every error is processed even if a spill write fails; the first write
    /// failure is returned afterwards. An entry whose spill write failed is
    /// still counted as omitted so the window never grows past capacity.
    pub async fn append(&mut self, errors: Vec<ValidationError>) -> Result<()> {
        let omitted_before = self.omitted;
        let mut first_failure = None;

        for error in errors {
            if self.window.len() >= self.capacity {
                if let Some(oldest) = self.window.pop_front() {
                    self.omitted += 1;
                    if let Err(e) = self.spill(&oldest).await {
                        warn!(
                            path = %self.sink.path().display(),
                            file_line = oldest.file_line,
                            error = %e,
                            "Failed to spill evicted error"
                        );
                        first_failure.get_or_insert(e);
                    }
                }
            }
            self.window.push_back(error);
        }

        if self.omitted / EVICTION_WARN_EVERY > omitted_before / EVICTION_WARN_EVERY {
            warn!(
                omitted = self.omitted,
                kept = self.window.len(),
                path = %self.sink.path().display(),
                "Error memory limit reached, older errors moved to spill log"
            );
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn spill(&mut self, error: &ValidationError) -> Result<()> {
        let mut line = serde_json::to_vec(error)?;
        line.push(b'\n');
        self.sink.append(&line).await
    }

    /// Errors evicted to disk so far
    pub fn omitted(&self) -> u64 {
        self.omitted
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn spill_log(&self) -> &Path {
        self.sink.path()
    }

    /// The retained window, oldest first
    pub fn into_details(self) -> Vec<ValidationError> {
        self.window.into()
    }
}
