//! Persistence gateway
//!
//! The pipeline needs exactly two operations from a datastore: a batched
//! existence check and a batched upsert. Concrete adapters live here:
//!
//! - [`MemoryGateway`]: in-process map for dry runs and tests
//! - [`postgres::PgGateway`]: PostgreSQL via sqlx (feature `database`)

#[cfg(feature = "database")]
pub mod postgres;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use clientfeed_common::Result;
use tokio::sync::RwLock;

use crate::record::ClientRecord;

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// The subset of `ids` already stored
    ///
    /// An empty input must yield an empty output without touching the store.
    async fn exist_ids(&self, ids: &[String]) -> Result<Vec<String>>;

    /// Upsert every record by id, as one unit
    ///
    /// Either the whole batch is stored or the call fails.
    async fn save_batch(&self, records: &[ClientRecord], source_file: &str) -> Result<()>;
}

/// Gateway backed by a map in memory
#[derive(Default)]
pub struct MemoryGateway {
    records: RwLock<HashMap<String, ClientRecord>>,
    exist_calls: AtomicUsize,
    save_calls: AtomicUsize,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with already-persisted records
    pub fn with_records(records: impl IntoIterator<Item = ClientRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| (r.id().to_string(), r))
            .collect();
        Self {
            records: RwLock::new(map),
            ..Default::default()
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<ClientRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Number of `exist_ids` round trips that reached the store
    pub fn exist_calls(&self) -> usize {
        self.exist_calls.load(Ordering::Relaxed)
    }

    /// Number of `save_batch` round trips
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn exist_ids(&self, ids: &[String]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.exist_calls.fetch_add(1, Ordering::Relaxed);

        let records = self.records.read().await;
        Ok(ids
            .iter()
            .filter(|id| records.contains_key(id.as_str()))
            .cloned()
            .collect())
    }

    async fn save_batch(&self, records: &[ClientRecord], _source_file: &str) -> Result<()> {
        self.save_calls.fetch_add(1, Ordering::Relaxed);

        let mut stored = self.records.write().await;
        for record in records {
            stored.insert(record.id().to_string(), record.clone());
        }
        Ok(())
    }
}
