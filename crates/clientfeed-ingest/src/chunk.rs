//! Chunk processing: dedup, validate, persist, account
//!
//! Each chunk costs at most two gateway round trips: one existence check for
//! all of its ids and one upsert for all of its valid records. Lines are
//! classified in stream order so the outcome of a file does not depend on the
//! chunk size.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use clientfeed_common::{FeedError, Result};
use tracing::{debug, error, warn};

use crate::gateway::PersistenceGateway;
use crate::ledger::ErrorLedger;
use crate::output::OutcomeLogs;
use crate::record::{self, ClientRecord};
use crate::stats::{ProcessingStats, ValidationError};

/// Message prefix for records rejected because their batch failed to persist
pub const MSG_SAVE_FAILED: &str = "Error saving to DB";

pub struct ChunkProcessor {
    gateway: Arc<dyn PersistenceGateway>,
    file_name: String,
    gateway_timeout: Option<Duration>,
    ledger: ErrorLedger,
    outcomes: Option<OutcomeLogs>,
    stats: ProcessingStats,
}

impl ChunkProcessor {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        file_name: impl Into<String>,
        ledger: ErrorLedger,
        gateway_timeout: Option<Duration>,
    ) -> Self {
        Self {
            gateway,
            file_name: file_name.into(),
            gateway_timeout,
            ledger,
            outcomes: None,
            stats: ProcessingStats::new(),
        }
    }

    /// Also append persisted and rejected lines to per-file logs
    pub fn with_outcome_logs(mut self, outcomes: OutcomeLogs) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    pub fn stats(&self) -> &ProcessingStats {
        &self.stats
    }

    /// Classify and persist one chunk of lines, in order
    ///
    /// Never fails: every line ends up counted as processed, duplicate, or error.
    /// Error positions count only the lines whose id was not already stored.
    pub async fn process_chunk(&mut self, lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }

        let first_file_line = self.stats.total_lines + 1;
        self.stats.total_lines += lines.len() as u64;

        let ids: Vec<&str> = lines.iter().map(|l| record::extract_id(l)).collect();
        let existing = self.existing_ids(&ids).await;

        let mut duplicates = 0u64;
        let mut position = 0usize;
        let mut accepted: HashSet<&str> = HashSet::with_capacity(lines.len());
        let mut valid: Vec<(usize, u64, ClientRecord)> = Vec::with_capacity(lines.len());
        // Lines repeating the id of a valid line earlier in this chunk
        let mut repeats: Vec<(usize, u64, &str)> = Vec::new();
        let mut rejected: Vec<ValidationError> = Vec::new();

        for (idx, (line, id)) in lines.iter().zip(&ids).enumerate() {
            if existing.contains(*id) {
                duplicates += 1;
                continue;
            }
            position += 1;
            let file_line = first_file_line + idx as u64;

            // Once the batch is stored these are duplicates, as they would have
            // been had the chunk ended before them.
            if accepted.contains(id) {
                repeats.push((position, file_line, line.as_str()));
                continue;
            }

            match record::classify(line) {
                Ok(client) => {
                    accepted.insert(*id);
                    valid.push((position, file_line, client));
                },
                Err(messages) => rejected.push(ValidationError::new(position, file_line, line.as_str(), messages)),
            }
        }

        let mut processed = 0u64;
        if valid.is_empty() {
            debug!(
                file = %self.file_name,
                duplicates,
                errors = rejected.len(),
                "No valid records to save in this chunk"
            );
        } else {
            let records: Vec<ClientRecord> = valid.iter().map(|(_, _, r)| r.clone()).collect();
            let saved = self
                .round_trip(self.gateway.save_batch(&records, &self.file_name))
                .await;

            match saved {
                Ok(()) => {
                    processed = records.len() as u64;
                    duplicates += repeats.len() as u64;
                },
                Err(e) => {
                    warn!(
                        file = %self.file_name,
                        records = records.len(),
                        transient = e.is_transient(),
                        error = %e,
                        "Batch upsert failed, rejecting the whole batch"
                    );
                    let message = format!("{MSG_SAVE_FAILED}: {e}");
                    rejected.extend(valid.iter().map(|(position, file_line, client)| {
                        ValidationError::new(*position, *file_line, client.original_line(), vec![message.clone()])
                    }));
                    // Nothing with their id was stored, so repeats are judged on their own.
                    rejected.extend(repeats.iter().map(|(position, file_line, line)| {
                        let errors = match record::classify(line) {
                            Ok(_) => vec![message.clone()],
                            Err(messages) => messages,
                        };
                        ValidationError::new(*position, *file_line, *line, errors)
                    }));
                    rejected.sort_by_key(|v| v.file_line);
                },
            }
        }

        self.stats.processed += processed;
        self.stats.duplicates += duplicates;
        self.stats.errors += rejected.len() as u64;

        debug!(
            file = %self.file_name,
            lines = lines.len(),
            processed,
            duplicates,
            errors = rejected.len(),
            "Chunk processed"
        );

        if let Some(outcomes) = self.outcomes.as_mut() {
            let persisted: Vec<&str> = if processed > 0 {
                valid.iter().map(|(_, _, client)| client.original_line()).collect()
            } else {
                Vec::new()
            };
            let failed: Vec<&str> = rejected.iter().map(|v| v.content.as_str()).collect();
            if let Err(e) = outcomes.record(&persisted, &failed).await {
                error!(file = %self.file_name, error = %e, "Failed to write outcome logs");
            }
        }

        self.record_errors(rejected).await;
    }

    /// Account for a line that was too long to be read
    pub async fn reject_oversized_line(&mut self, max_line_length: usize) {
        self.stats.total_lines += 1;
        self.stats.errors += 1;
        let rejected = ValidationError::new(
            1,
            self.stats.total_lines,
            String::new(),
            vec![format!("Line exceeds maximum length of {max_line_length} bytes")],
        );
        self.record_errors(vec![rejected]).await;
    }

    /// Final stats with the retained error window
    pub fn finish(self) -> ProcessingStats {
        let mut stats = self.stats;
        stats.omitted_errors = self.ledger.omitted();
        stats.error_details = self.ledger.into_details();
        stats.complete();
        stats
    }

    async fn existing_ids(&self, ids: &[&str]) -> HashSet<String> {
        let mut unique: Vec<String> = Vec::with_capacity(ids.len());
        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids {
            if !id.is_empty() && seen.insert(*id) {
                unique.push((*id).to_string());
            }
        }

        match self.round_trip(self.gateway.exist_ids(&unique)).await {
            Ok(existing) => existing.into_iter().collect(),
            Err(e) => {
                // Upserts are idempotent, so treating every id as new is safe.
                warn!(
                    file = %self.file_name,
                    ids = unique.len(),
                    error = %e,
                    "Duplicate check failed, treating all ids as new"
                );
                HashSet::new()
            },
        }
    }

    async fn round_trip<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match self.gateway_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| FeedError::Timeout(limit))?,
            None => call.await,
        }
    }

    async fn record_errors(&mut self, rejected: Vec<ValidationError>) {
        if rejected.is_empty() {
            return;
        }
        if let Err(e) = self.ledger.append(rejected).await {
            error!(
                file = %self.file_name,
                spill_log = %self.ledger.spill_log().display(),
                error = %e,
                "Failed to persist evicted errors"
            );
        }
        self.stats.omitted_errors = self.ledger.omitted();
    }
}
