//! Clientfeed Ingest - client record file ingestion

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use clientfeed_common::logging::{init_logging, LogConfig, LogLevel};
use clientfeed_ingest::config::{DatabaseConfig, IngestConfig};
use clientfeed_ingest::gateway::{MemoryGateway, PersistenceGateway};
use clientfeed_ingest::ingestor::StreamIngestor;
use clientfeed_ingest::lifecycle::LifecycleDirs;
use clientfeed_ingest::watcher::IngestionWatcher;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "clientfeed-ingest")]
#[command(author, version, about = "Client record file ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Base directory holding process/, processing/, processed/ and error/
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Keep records in memory instead of writing to the database
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Watch the inbound directory until interrupted
    Watch,

    /// Ingest a single file
    File {
        /// File to ingest; it is moved through the lifecycle directories
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("clientfeed-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().with_env_overrides().unwrap_or(log_config);

    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::load().context("Failed to load configuration")?;
    if let Some(base_dir) = cli.base_dir {
        config.watcher.base_dir = base_dir;
    }

    let gateway = build_gateway(&config.database, cli.dry_run).await?;
    let dirs = LifecycleDirs::new(&config.watcher.base_dir);
    dirs.ensure()
        .await
        .with_context(|| format!("Failed to create lifecycle directories under {}", dirs.base().display()))?;

    let ingestor = Arc::new(StreamIngestor::new(dirs, gateway, config.pipeline.clone()));

    match cli.command {
        Command::Watch => {
            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received");
                }
                signal.cancel();
            });

            let summary = IngestionWatcher::from_config(ingestor, &config.watcher)
                .run(shutdown)
                .await?;
            info!(summary = %serde_json::to_string(&summary)?, "Watcher summary");
        },
        Command::File { path } => {
            let report = ingestor
                .ingest(&path)
                .await
                .with_context(|| format!("Failed to claim {}", path.display()))?;
            info!(report = %serde_json::to_string(&report)?, "Ingest report");

            if let Some(failure) = &report.failure {
                anyhow::bail!("Ingestion of {} failed: {failure}", report.file_name);
            }
        },
    }

    Ok(())
}

async fn build_gateway(database: &DatabaseConfig, dry_run: bool) -> Result<Arc<dyn PersistenceGateway>> {
    if dry_run {
        info!("Dry run, records are kept in memory only");
        return Ok(Arc::new(MemoryGateway::new()));
    }
    connect_database(database).await
}

#[cfg(feature = "database")]
async fn connect_database(database: &DatabaseConfig) -> Result<Arc<dyn PersistenceGateway>> {
    use clientfeed_ingest::gateway::postgres::PgGateway;

    let gateway = PgGateway::connect(database)
        .await
        .context("Failed to connect to database")?;
    gateway
        .ensure_schema()
        .await
        .context("Failed to create the clients table")?;
    Ok(Arc::new(gateway))
}

#[cfg(not(feature = "database"))]
async fn connect_database(_database: &DatabaseConfig) -> Result<Arc<dyn PersistenceGateway>> {
    tracing::warn!("Built without the `database` feature, records are kept in memory only");
    Ok(Arc::new(MemoryGateway::new()))
}
