//! PostgreSQL persistence gateway

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use clientfeed_common::{FeedError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use super::PersistenceGateway;
use crate::config::DatabaseConfig;
use crate::record::ClientRecord;

const CREATE_CLIENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS clients (
    id          VARCHAR(50) PRIMARY KEY,
    first_name  VARCHAR(255) NOT NULL,
    last_name   VARCHAR(255) NOT NULL,
    email       VARCHAR(255) NOT NULL,
    age         INTEGER NOT NULL,
    source_file TEXT,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const SELECT_EXISTING_IDS: &str = "SELECT id FROM clients WHERE id = ANY($1)";

const UPSERT_CLIENTS: &str = r#"
INSERT INTO clients (id, first_name, last_name, email, age, source_file)
SELECT id, first_name, last_name, email, age, $6
FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::int4[])
    AS batch(id, first_name, last_name, email, age)
ON CONFLICT (id) DO UPDATE SET
    first_name  = EXCLUDED.first_name,
    last_name   = EXCLUDED.last_name,
    email       = EXCLUDED.email,
    age         = EXCLUDED.age,
    source_file = EXCLUDED.source_file,
    updated_at  = NOW()
"#;

fn db_error(err: sqlx::Error) -> FeedError {
    FeedError::Database(err.to_string())
}

/// Connection failures worth waiting out, e.g. the database still starting
fn is_recoverable(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_)
    )
}

pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, retrying recoverable failures up to `connect_retries` times
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let attempts = config.connect_retries.max(1);
        let delay = Duration::from_secs(config.retry_delay_secs);

        for attempt in 1..=attempts {
            info!(attempt, attempts, "Connecting to PostgreSQL");

            let result = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
                .connect(&config.url)
                .await;

            match result {
                Ok(pool) => {
                    info!("Database connection pool established");
                    return Ok(Self::new(pool));
                },
                Err(e) if attempt < attempts && is_recoverable(&e) => {
                    warn!(attempt, error = %e, delay_secs = delay.as_secs(), "Database not reachable, retrying");
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(db_error(e)),
            }
        }

        Err(FeedError::Database("no connection attempts were made".to_string()))
    }

    /// Create the `clients` table if it does not exist
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_CLIENTS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceGateway for PgGateway {
    async fn exist_ids(&self, ids: &[String]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let existing: Vec<String> = sqlx::query_scalar(SELECT_EXISTING_IDS)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        debug!(requested = ids.len(), existing = existing.len(), "Checked existing ids");
        Ok(existing)
    }

    async fn save_batch(&self, records: &[ClientRecord], source_file: &str) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        // ON CONFLICT cannot touch the same row twice in one statement; last write wins.
        let mut latest: HashMap<&str, usize> = HashMap::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            latest.insert(record.id(), idx);
        }
        let batch: Vec<&ClientRecord> = records
            .iter()
            .enumerate()
            .filter(|(idx, r)| latest.get(r.id()) == Some(idx))
            .map(|(_, r)| r)
            .collect();

        let ids: Vec<&str> = batch.iter().map(|r| r.id()).collect();
        let first_names: Vec<&str> = batch.iter().map(|r| r.first_name()).collect();
        let last_names: Vec<&str> = batch.iter().map(|r| r.last_name()).collect();
        let emails: Vec<&str> = batch.iter().map(|r| r.email()).collect();
        let ages: Vec<i32> = batch.iter().map(|r| i32::from(r.age())).collect();

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query(UPSERT_CLIENTS)
            .bind(&ids)
            .bind(&first_names)
            .bind(&last_names)
            .bind(&emails)
            .bind(&ages)
            .bind(source_file)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        debug!(count = batch.len(), source_file, "Upserted client batch");
        Ok(())
    }
}
