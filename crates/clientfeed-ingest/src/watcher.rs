//! Inbound directory watcher
//!
//! The inbound directory is scanned on an interval. Matching files that are
//! neither queued nor in flight go onto an unbounded channel drained by a
//! single worker task, so at most one file is ever being ingested.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clientfeed_common::{FeedError, Result};
use serde::Serialize;
use tokio::fs;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::ingestor::{IngestReport, StreamIngestor};

/// Inbound file naming convention
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNaming {
    prefix: String,
    extension: String,
}

impl FileNaming {
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        file_name.starts_with(&self.prefix) && file_name.ends_with(&self.extension)
    }
}

/// Totals over every file the worker took
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherSummary {
    pub files_processed: u64,
    pub files_failed: u64,
    /// Files that could not be claimed
    pub files_skipped: u64,
    pub total_lines: u64,
    pub processed: u64,
    pub errors: u64,
    pub duplicates: u64,
}

impl WatcherSummary {
    fn record(&mut self, report: &IngestReport) {
        if report.succeeded() {
            self.files_processed += 1;
        } else {
            self.files_failed += 1;
        }
        self.total_lines += report.stats.total_lines;
        self.processed += report.stats.processed;
        self.errors += report.stats.errors;
        self.duplicates += report.stats.duplicates;
    }
}

/// Sending half of the ingestion queue
///
/// Tracks every path that is queued or in flight; the worker releases a path
/// once its ingestion returns.
#[derive(Clone)]
pub struct IngestionQueue {
    sender: mpsc::UnboundedSender<PathBuf>,
    tracked: Arc<Mutex<HashSet<PathBuf>>>,
}

impl IngestionQueue {
    /// Enqueue `path` unless it is already queued or in flight
    pub async fn offer(&self, path: PathBuf) -> bool {
        let mut tracked = self.tracked.lock().await;
        if tracked.contains(&path) {
            return false;
        }
        if self.sender.send(path.clone()).is_err() {
            return false;
        }
        tracked.insert(path);
        true
    }

    /// Paths queued or in flight
    pub async fn pending(&self) -> usize {
        self.tracked.lock().await.len()
    }
}

pub struct IngestionWatcher {
    ingestor: Arc<StreamIngestor>,
    naming: FileNaming,
    poll_interval: Duration,
}

impl IngestionWatcher {
    pub fn new(ingestor: Arc<StreamIngestor>, naming: FileNaming, poll_interval: Duration) -> Self {
        Self {
            ingestor,
            naming,
            poll_interval,
        }
    }

    pub fn from_config(ingestor: Arc<StreamIngestor>, config: &WatcherConfig) -> Self {
        Self::new(
            ingestor,
            FileNaming::new(&config.file_prefix, &config.file_extension),
            config.poll_interval,
        )
    }

    /// Matching files in the inbound directory, in lexical order
    pub async fn scan_inbound(&self) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(self.ingestor.dirs().inbound()).await?;
        let mut found = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str() {
                Some(name) if self.naming.matches(name) => found.push(entry.path()),
                Some(_) => {},
                None => debug!(path = %entry.path().display(), "Ignoring non UTF-8 file name"),
            }
        }

        found.sort();
        Ok(found)
    }

    /// Run until `shutdown` is cancelled
    ///
    /// The file in flight when shutdown is requested is finished; files still
    /// queued stay in the inbound directory.
    pub async fn run(self, shutdown: CancellationToken) -> Result<WatcherSummary> {
        self.ingestor.dirs().ensure().await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = IngestionQueue {
            sender,
            tracked: Arc::new(Mutex::new(HashSet::new())),
        };

        let worker = tokio::spawn(drain_queue(
            Arc::clone(&self.ingestor),
            Arc::clone(&queue.tracked),
            receiver,
            shutdown.clone(),
        ));

        info!(
            inbound = %self.ingestor.dirs().inbound().display(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Watching for inbound files"
        );

        loop {
            match self.scan_inbound().await {
                Ok(found) => {
                    let mut added = 0usize;
                    for path in found {
                        if queue.offer(path).await {
                            added += 1;
                        }
                    }
                    if added > 0 {
                        let pending = queue.pending().await;
                        info!(added, pending, "Queued inbound files");
                    }
                },
                Err(e) => warn!(error = %e, "Scanning inbound directory failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, waiting for the file in flight");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        drop(queue);
        let summary = worker.await.map_err(|e| FeedError::Task(e.to_string()))?;

        info!(
            files_processed = summary.files_processed,
            files_failed = summary.files_failed,
            files_skipped = summary.files_skipped,
            "Watcher stopped"
        );
        Ok(summary)
    }
}

async fn drain_queue(
    ingestor: Arc<StreamIngestor>,
    tracked: Arc<Mutex<HashSet<PathBuf>>>,
    mut receiver: mpsc::UnboundedReceiver<PathBuf>,
    shutdown: CancellationToken,
) -> WatcherSummary {
    let mut summary = WatcherSummary::default();

    loop {
        let path = tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            next = receiver.recv() => match next {
                Some(path) => path,
                None => break,
            },
        };

        match ingestor.ingest(&path).await {
            Ok(report) => summary.record(&report),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not claim file");
                summary.files_skipped += 1;
            },
        }

        tracked.lock().await.remove(&path);
    }

    summary
}
