//! Clientfeed Ingest Library
//!
//! Streaming ingestion of pipe-delimited client record files into a
//! persistence gateway.
//!
//! # Pipeline
//!
//! - **watcher**: discovers inbound files and ingests them one at a time
//! - **ingestor**: claims a file, streams it in chunks, files it away
//! - **chunk**: batched dedup, validation and upsert per chunk
//! - **ledger**: bounded per-file error window with an on-disk spill log
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use clientfeed_ingest::config::PipelineConfig;
//! use clientfeed_ingest::gateway::MemoryGateway;
//! use clientfeed_ingest::ingestor::StreamIngestor;
//! use clientfeed_ingest::lifecycle::LifecycleDirs;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dirs = LifecycleDirs::new("./uploads");
//!     dirs.ensure().await?;
//!
//!     let ingestor = StreamIngestor::new(dirs, Arc::new(MemoryGateway::new()), PipelineConfig::default());
//!     let report = ingestor
//!         .ingest("./uploads/process/CLIENTS_IN_20240101.dat".as_ref())
//!         .await?;
//!     println!("{} lines", report.stats.total_lines);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod chunk;
pub mod config;
pub mod gateway;
pub mod ingestor;
pub mod ledger;
pub mod lifecycle;
pub mod output;
pub mod record;
pub mod stats;
pub mod watcher;

pub use config::IngestConfig;
pub use gateway::{MemoryGateway, PersistenceGateway};
pub use ingestor::{IngestReport, StreamIngestor};
pub use record::ClientRecord;
pub use stats::{ProcessingStats, ValidationError};
pub use watcher::IngestionWatcher;
