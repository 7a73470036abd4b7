//! Shared helpers for clientfeed-ingest integration tests
//!
//! Every test gets its own temporary base directory with the lifecycle
//! directories already created.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clientfeed_common::{FeedError, Result};
use clientfeed_ingest::config::PipelineConfig;
use clientfeed_ingest::gateway::{MemoryGateway, PersistenceGateway};
use clientfeed_ingest::ingestor::StreamIngestor;
use clientfeed_ingest::lifecycle::{JobState, LifecycleDirs};
use clientfeed_ingest::ClientRecord;
use tempfile::TempDir;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,clientfeed_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A temporary base directory with its lifecycle directories
pub struct TestDirs {
    _tmp: TempDir,
    pub dirs: LifecycleDirs,
}

impl TestDirs {
    pub async fn new() -> Self {
        let tmp = tempfile::tempdir().expect("Failed to create temp dir");
        let dirs = LifecycleDirs::new(tmp.path());
        dirs.ensure().await.expect("Failed to create lifecycle dirs");
        Self { _tmp: tmp, dirs }
    }

    /// Drop a file into the inbound directory
    pub fn write_inbound(&self, name: &str, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.dirs.inbound().join(name);
        std::fs::write(&path, content).expect("Failed to write inbound file");
        path
    }

    pub fn files_in(&self, state: JobState) -> Vec<String> {
        list_files(&self.dirs.dir(state))
    }

    pub fn ingestor(&self, gateway: Arc<dyn PersistenceGateway>, pipeline: PipelineConfig) -> StreamIngestor {
        StreamIngestor::new(self.dirs.clone(), gateway, pipeline)
    }
}

pub fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .filter_map(|e| e.file_name().to_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

pub fn pipeline(chunk_size: usize) -> PipelineConfig {
    PipelineConfig {
        chunk_size,
        ..PipelineConfig::default()
    }
}

pub fn memory_gateway() -> Arc<MemoryGateway> {
    Arc::new(MemoryGateway::new())
}

/// Poll `check` until it holds or `limit` passes
pub async fn wait_for(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Gateway whose upserts always fail
pub struct FailingGateway;

#[async_trait]
impl PersistenceGateway for FailingGateway {
    async fn exist_ids(&self, _ids: &[String]) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn save_batch(&self, _records: &[ClientRecord], _source_file: &str) -> Result<()> {
        Err(FeedError::Database("could not serialize access".to_string()))
    }
}

/// Gateway that records the highest number of overlapping upserts
#[derive(Default)]
pub struct OverlapTracker {
    inner: MemoryGateway,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl OverlapTracker {
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceGateway for OverlapTracker {
    async fn exist_ids(&self, ids: &[String]) -> Result<Vec<String>> {
        self.inner.exist_ids(ids).await
    }

    async fn save_batch(&self, records: &[ClientRecord], source_file: &str) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = self.inner.save_batch(records, source_file).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
