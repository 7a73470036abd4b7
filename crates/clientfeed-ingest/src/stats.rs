//! Per-file ingestion statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A rejected line together with every reason it was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    /// 1-based position within the chunk the line was processed in
    pub line: usize,
    /// 1-based position among the non-blank lines of the file
    pub file_line: u64,
    pub content: String,
    pub errors: Vec<String>,
}

impl ValidationError {
    pub fn new(line: usize, file_line: u64, content: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            line,
            file_line,
            content: content.into(),
            errors,
        }
    }
}

/// Aggregate counts for one file
///
/// Every line read from the file lands in exactly one of `processed`,
/// `errors` or `duplicates`. A persistence failure moves records from the
/// would-be processed bucket into `errors`; nothing is counted twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub total_lines: u64,
    pub processed: u64,
    pub errors: u64,
    pub duplicates: u64,
    /// Most recent errors, oldest first; older ones were spilled to disk
    pub error_details: Vec<ValidationError>,
    /// Errors evicted from `error_details` over the life of the file
    pub omitted_errors: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

impl ProcessingStats {
    /// Create new empty stats
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Mark stats as completed
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    /// `processed + errors + duplicates == total_lines`
    pub fn is_balanced(&self) -> bool {
        self.processed + self.errors + self.duplicates == self.total_lines
    }

    /// Same counts and the same retained errors, ignoring timing
    pub fn same_outcome(&self, other: &ProcessingStats) -> bool {
        self.total_lines == other.total_lines
            && self.processed == other.processed
            && self.errors == other.errors
            && self.duplicates == other.duplicates
            && self.omitted_errors == other.omitted_errors
            && self.error_details.len() == other.error_details.len()
            && self
                .error_details
                .iter()
                .zip(&other.error_details)
                .all(|(a, b)| a.file_line == b.file_line && a.content == b.content && a.errors == b.errors)
    }
}
