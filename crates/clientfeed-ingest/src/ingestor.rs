//! Streaming ingestion of a single file
//!
//! A file is claimed into `processing/`, read line by line with a bounded
//! line length, fed to a [`ChunkProcessor`] in chunks, and finally moved to
//! `processed/` or `error/`. Persisted and rejected lines are appended to
//! `output/processed_<name>.log` and `output/rejected_<name>.log`.
//!
//! Memory use is bounded by the chunk size, the line length limit and the
//! error window, whatever the file size.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clientfeed_common::Result;
use futures::StreamExt;
use serde::Serialize;
use tokio::fs;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::chunk::ChunkProcessor;
use crate::config::PipelineConfig;
use crate::gateway::PersistenceGateway;
use crate::ledger::ErrorLedger;
use crate::lifecycle::{FileJob, JobState, LifecycleDirs};
use crate::output::OutcomeLogs;
use crate::record::FIELD_DELIMITER;
use crate::stats::ProcessingStats;

/// Outcome of ingesting one file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub run_id: Uuid,
    pub file_name: String,
    /// Where the file ended up
    pub state: JobState,
    pub location: PathBuf,
    pub stats: ProcessingStats,
    /// Why the file did not reach `processed/`
    pub failure: Option<String>,
}

impl IngestReport {
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Processed
    }
}

/// Trim every field and drop blank lines
///
/// Returns `None` for lines that hold nothing but whitespace.
pub fn normalize_line(raw: &str) -> Option<String> {
    if raw.trim().is_empty() {
        return None;
    }
    let fields: Vec<&str> = raw.split(FIELD_DELIMITER).map(str::trim).collect();
    Some(fields.join("|"))
}

pub struct StreamIngestor {
    dirs: LifecycleDirs,
    gateway: Arc<dyn PersistenceGateway>,
    pipeline: PipelineConfig,
}

impl StreamIngestor {
    pub fn new(dirs: LifecycleDirs, gateway: Arc<dyn PersistenceGateway>, pipeline: PipelineConfig) -> Self {
        Self {
            dirs,
            gateway,
            pipeline,
        }
    }

    pub fn dirs(&self) -> &LifecycleDirs {
        &self.dirs
    }

    /// Ingest the inbound file at `path`
    ///
    /// Only a failed claim is returned as an error; in that case the file was
    /// not touched. Once claimed, the file always ends in `processed/` or
    /// `error/` (or stays in `processing/` if that last move fails) and the
    /// report says which.
    pub async fn ingest(&self, path: &Path) -> Result<IngestReport> {
        let run_id = Uuid::new_v4();
        let job = FileJob::discovered(path)?;
        let span = info_span!("ingest", %run_id, file = %job.name());

        self.run(run_id, job).instrument(span).await
    }

    async fn run(&self, run_id: Uuid, job: FileJob) -> Result<IngestReport> {
        let claimed = self.dirs.relocate(&job, JobState::Processing).await?;
        info!("Processing file");

        let ledger = ErrorLedger::new(
            self.pipeline.max_errors_in_memory,
            self.dirs.spill_log(claimed.name()),
        );
        let mut chunks = ChunkProcessor::new(
            Arc::clone(&self.gateway),
            claimed.name(),
            ledger,
            self.pipeline.gateway_timeout,
        )
        .with_outcome_logs(OutcomeLogs::new(&self.dirs.output_dir(), claimed.name()));

        let outcome = self.stream_chunks(claimed.path(), &mut chunks).await;
        let stats = chunks.finish();

        let (target, mut failure) = match outcome {
            Ok(()) => (JobState::Processed, None),
            Err(e) => {
                error!(error = %e, lines_read = stats.total_lines, "Reading file failed");
                (JobState::Errored, Some(e.to_string()))
            },
        };

        let (state, location) = match self.dirs.relocate(&claimed, target).await {
            Ok(done) => (done.state(), done.path().to_path_buf()),
            Err(e) => {
                error!(error = %e, "Could not move file out of processing");
                failure.get_or_insert_with(|| e.to_string());
                (claimed.state(), claimed.path().to_path_buf())
            },
        };

        info!(
            state = %state,
            total_lines = stats.total_lines,
            processed = stats.processed,
            errors = stats.errors,
            duplicates = stats.duplicates,
            omitted_errors = stats.omitted_errors,
            duration_secs = stats.duration_secs,
            "Finished file"
        );

        Ok(IngestReport {
            run_id,
            file_name: claimed.name().to_string(),
            state,
            location,
            stats,
            failure,
        })
    }

    /// Feed the file to `chunks`, flushing whatever is pending even on failure
    async fn stream_chunks(&self, path: &Path, chunks: &mut ChunkProcessor) -> Result<()> {
        let chunk_size = self.pipeline.chunk_size.max(1);
        let max_line_length = self.pipeline.max_line_length;

        let file = fs::File::open(path).await?;
        let mut lines = FramedRead::new(file, LinesCodec::new_with_max_length(max_line_length));
        let mut pending: Vec<String> = Vec::with_capacity(chunk_size);
        let mut resume_after_error = false;
        let mut outcome = Ok(());

        loop {
            let next = match lines.next().await {
                Some(next) => next,
                // A framed stream yields one `None` after a decode error before
                // it reads on; the codec has already skipped the long line.
                None if resume_after_error => {
                    resume_after_error = false;
                    continue;
                },
                None => break,
            };

            match next {
                Ok(raw) => {
                    resume_after_error = false;
                    let Some(line) = normalize_line(&raw) else {
                        continue;
                    };
                    pending.push(line);
                    if pending.len() >= chunk_size {
                        let full = std::mem::replace(&mut pending, Vec::with_capacity(chunk_size));
                        chunks.process_chunk(full).await;
                    }
                },
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(max_line_length, "Skipping line over the length limit");
                    resume_after_error = true;
                    chunks.process_chunk(std::mem::take(&mut pending)).await;
                    chunks.reject_oversized_line(max_line_length).await;
                },
                Err(LinesCodecError::Io(e)) => {
                    outcome = Err(e.into());
                    break;
                },
            }
        }

        chunks.process_chunk(pending).await;
        outcome
    }
}
