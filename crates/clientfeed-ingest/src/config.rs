//! Configuration management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ledger::DEFAULT_MAX_ERRORS_IN_MEMORY;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default base directory holding the lifecycle directories.
pub const DEFAULT_WATCH_DIR: &str = "./uploads";

/// Inbound files must start with this prefix.
pub const DEFAULT_FILE_PREFIX: &str = "CLIENTS_IN_";

/// Inbound files must end with this extension.
pub const DEFAULT_FILE_EXTENSION: &str = ".dat";

/// Default number of lines per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Default maximum length of a single line in bytes (64 KiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Default inbound directory scan interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/clientfeed";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default number of connection attempts at startup.
pub const DEFAULT_DATABASE_CONNECT_RETRIES: u32 = 10;

/// Default delay between connection attempts in seconds.
pub const DEFAULT_DATABASE_RETRY_DELAY_SECS: u64 = 5;

/// Ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    pub pipeline: PipelineConfig,
    pub watcher: WatcherConfig,
    pub database: DatabaseConfig,
}

/// Settings for processing a single file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Lines per dedup/validate/persist round
    pub chunk_size: usize,
    /// Errors kept in memory per file before spilling to disk
    pub max_errors_in_memory: usize,
    /// Longer lines are rejected without being buffered
    pub max_line_length: usize,
    /// Upper bound on each gateway round trip; `None` waits indefinitely
    pub gateway_timeout: Option<Duration>,
}

/// Settings for discovering inbound files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Base directory containing `process/`, `processing/`, `processed/`, `error/`, `errors/`
    pub base_dir: PathBuf,
    pub file_prefix: String,
    pub file_extension: String,
    pub poll_interval: Duration,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub connect_retries: u32,
    pub retry_delay_secs: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl IngestConfig {
    /// Load configuration from `.env`, the environment, and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = IngestConfig {
            pipeline: PipelineConfig {
                chunk_size: env_parse("CHUNK_SIZE").unwrap_or(DEFAULT_CHUNK_SIZE),
                max_errors_in_memory: env_parse("MAX_ERRORS_IN_MEMORY")
                    .unwrap_or(DEFAULT_MAX_ERRORS_IN_MEMORY),
                max_line_length: env_parse("MAX_LINE_LENGTH").unwrap_or(DEFAULT_MAX_LINE_LENGTH),
                gateway_timeout: env_parse::<u64>("GATEWAY_TIMEOUT_SECS")
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs),
            },
            watcher: WatcherConfig {
                base_dir: std::env::var("WATCH_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_WATCH_DIR)),
                file_prefix: std::env::var("FILE_PREFIX")
                    .unwrap_or_else(|_| DEFAULT_FILE_PREFIX.to_string()),
                file_extension: std::env::var("FILE_EXTENSION")
                    .unwrap_or_else(|_| DEFAULT_FILE_EXTENSION.to_string()),
                poll_interval: Duration::from_millis(
                    env_parse("POLL_INTERVAL_MS").unwrap_or(DEFAULT_POLL_INTERVAL_MS),
                ),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                connect_timeout_secs: env_parse("DATABASE_CONNECT_TIMEOUT")
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
                connect_retries: env_parse("DATABASE_CONNECT_RETRIES")
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_RETRIES),
                retry_delay_secs: env_parse("DATABASE_RETRY_DELAY_SECS")
                    .unwrap_or(DEFAULT_DATABASE_RETRY_DELAY_SECS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pipeline.chunk_size == 0 {
            anyhow::bail!("CHUNK_SIZE must be greater than 0");
        }

        if self.pipeline.max_errors_in_memory == 0 {
            anyhow::bail!("MAX_ERRORS_IN_MEMORY must be greater than 0");
        }

        if self.pipeline.max_line_length == 0 {
            anyhow::bail!("MAX_LINE_LENGTH must be greater than 0");
        }

        if self.watcher.poll_interval.is_zero() {
            anyhow::bail!("POLL_INTERVAL_MS must be greater than 0");
        }

        if self.watcher.file_prefix.contains(std::path::MAIN_SEPARATOR) {
            anyhow::bail!(
                "FILE_PREFIX must be a plain file name prefix, got {:?}",
                self.watcher.file_prefix
            );
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_errors_in_memory: DEFAULT_MAX_ERRORS_IN_MEMORY,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            gateway_timeout: None,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_WATCH_DIR),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            connect_retries: DEFAULT_DATABASE_CONNECT_RETRIES,
            retry_delay_secs: DEFAULT_DATABASE_RETRY_DELAY_SECS,
        }
    }
}
