//! File lifecycle directories
//!
//! A file's processing state is the directory it sits in. [`LifecycleDirs`]
//! owns every transition and performs it as a single `rename`, so a file is
//! always in exactly one lifecycle directory and a claimed file can never be
//! seen again by a scan of the inbound directory. A failed rename leaves the
//! file where it was.

use std::fmt;
use std::path::{Path, PathBuf};

use clientfeed_common::{FeedError, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the inbound directory
    Discovered,
    /// Claimed by the ingestor
    Processing,
    Processed,
    Errored,
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Discovered => "discovered",
            JobState::Processing => "processing",
            JobState::Processed => "processed",
            JobState::Errored => "errored",
        }
    }

    /// Directory name under the base directory
    pub fn dir_name(&self) -> &'static str {
        match self {
            JobState::Discovered => "process",
            JobState::Processing => "processing",
            JobState::Processed => "processed",
            JobState::Errored => "error",
        }
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Discovered, JobState::Processing)
                | (JobState::Processing, JobState::Processed)
                | (JobState::Processing, JobState::Errored)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Processed | JobState::Errored)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound file and where it currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileJob {
    name: String,
    path: PathBuf,
    state: JobState,
}

impl FileJob {
    /// A file found in the inbound directory
    pub fn discovered(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| FeedError::InvalidFileName(path.clone()))?;

        Ok(Self {
            name,
            path,
            state: JobState::Discovered,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> JobState {
        self.state
    }
}

/// The lifecycle directories under one base directory
#[derive(Debug, Clone)]
pub struct LifecycleDirs {
    base: PathBuf,
}

impl LifecycleDirs {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn dir(&self, state: JobState) -> PathBuf {
        self.base.join(state.dir_name())
    }

    /// The watched inbound directory
    pub fn inbound(&self) -> PathBuf {
        self.dir(JobState::Discovered)
    }

    /// Directory of per-file error spill logs
    pub fn errors_dir(&self) -> PathBuf {
        self.base.join("errors")
    }

    pub fn spill_log(&self, file_name: &str) -> PathBuf {
        ledger::spill_path(&self.errors_dir(), file_name)
    }

    /// Directory of per-file persisted and rejected line logs
    pub fn output_dir(&self) -> PathBuf {
        self.base.join("output")
    }

    /// Create every lifecycle directory; log directories are created on demand
    pub async fn ensure(&self) -> Result<()> {
        for state in [
            JobState::Discovered,
            JobState::Processing,
            JobState::Processed,
            JobState::Errored,
        ] {
            fs::create_dir_all(self.dir(state)).await?;
        }
        Ok(())
    }

    /// Move `job` into the directory of `to`
    ///
    /// On failure the file stays at its current location and `job` is unchanged
    /// on the caller's side.
    pub async fn relocate(&self, job: &FileJob, to: JobState) -> Result<FileJob> {
        if !job.state.can_transition_to(to) {
            return Err(FeedError::InvalidTransition {
                from: job.state.to_string(),
                to: to.to_string(),
            });
        }

        let target_dir = self.dir(to);
        fs::create_dir_all(&target_dir).await?;
        let target = target_dir.join(&job.name);

        fs::rename(&job.path, &target)
            .await
            .map_err(|source| FeedError::Relocation {
                from: job.path.clone(),
                to: target.clone(),
                source,
            })?;

        debug!(file = %job.name, from = %job.state, to = %to, "Relocated file");

        Ok(FileJob {
            name: job.name.clone(),
            path: target,
            state: to,
        })
    }
}
