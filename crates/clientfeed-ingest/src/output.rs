//! Append-only per-file output logs
//!
//! [`AppendLog`] is a lazily opened, append-only file shared by the error
//! spill and the outcome logs. [`OutcomeLogs`] records, per inbound file, the
//! lines that were persisted and the lines that were rejected, in stream order.

use std::path::{Path, PathBuf};

use clientfeed_common::Result;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Persisted-lines log location for a given inbound file name
pub fn processed_log_path(output_dir: &Path, file_name: &str) -> PathBuf {
    output_dir.join(format!("processed_{file_name}.log"))
}

/// Rejected-lines log location for a given inbound file name
pub fn rejected_log_path(output_dir: &Path, file_name: &str) -> PathBuf {
    output_dir.join(format!("rejected_{file_name}.log"))
}

/// A file that is only ever appended to
///
/// Neither the parent directory nor the file is created until the first
/// write. A failed write drops the handle; the next write reopens the file.
pub struct AppendLog {
    path: PathBuf,
    file: Option<File>,
}

impl AppendLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `bytes` as-is and flush
    pub async fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if self.file.is_none() {
            if let Some(dir) = self.path.parent() {
                fs::create_dir_all(dir).await?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            debug!(path = %self.path.display(), "Opened append log");
            self.file = Some(file);
        }

        if let Some(file) = self.file.as_mut() {
            let written = async {
                file.write_all(bytes).await?;
                file.flush().await
            }
            .await;
            if let Err(e) = written {
                // Reopen on the next write rather than continue after a partial line.
                self.file = None;
                return Err(e.into());
            }
        }

        Ok(())
    }

    /// Append each line followed by a newline, as one write
    pub async fn append_lines(&mut self, lines: &[&str]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
        }
        self.append(&buf).await
    }
}

/// Persisted and rejected lines of one inbound file
pub struct OutcomeLogs {
    processed: AppendLog,
    rejected: AppendLog,
}

impl OutcomeLogs {
    pub fn new(output_dir: &Path, file_name: &str) -> Self {
        Self {
            processed: AppendLog::new(processed_log_path(output_dir, file_name)),
            rejected: AppendLog::new(rejected_log_path(output_dir, file_name)),
        }
    }

    /// Append one chunk's outcome; both logs are attempted even if one fails
    pub async fn record(&mut self, persisted: &[&str], rejected: &[&str]) -> Result<()> {
        let processed = self.processed.append_lines(persisted).await;
        let rejected = self.rejected.append_lines(rejected).await;
        processed.and(rejected)
    }

    pub fn processed_path(&self) -> &Path {
        self.processed.path()
    }

    pub fn rejected_path(&self) -> &Path {
        self.rejected.path()
    }
}
