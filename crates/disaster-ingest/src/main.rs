//! Disaster Ingest - Kafka to Postgres consumer for disaster event packets

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use disaster_common::logging::{init_logging, LogConfig, LogLevel};
use disaster_ingest::config::{ConsumerConfig, KafkaConfig, SourceKind};
use disaster_ingest::db;
use disaster_ingest::orchestrator::{BatchOptions, BatchOrchestrator, ContinuousOptions};
use disaster_ingest::queries::EventQueries;
use disaster_ingest::sink::{MemorySink, PgSink, StorageSink};
use disaster_ingest::source::{JsonLinesSource, MessageSource, MockSource};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "disaster-ingest")]
#[command(author, version, about = "Disaster event packet consumer")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume packets and store them
    Run {
        /// Keep polling until interrupted
        #[arg(long)]
        continuous: bool,

        /// Messages per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Seconds to sleep between batches in continuous mode
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Where packets come from
        #[arg(long, value_enum)]
        source: Option<SourceKind>,

        /// JSON lines file for `--source file`
        #[arg(long)]
        input: Option<PathBuf>,

        /// Stop a continuous run after this many batches
        #[arg(long)]
        max_batches: Option<u64>,

        /// Run migrations before consuming
        #[arg(long)]
        init_db: bool,

        /// Keep everything in memory instead of writing to Postgres
        #[arg(long)]
        dry_run: bool,
    },

    /// Create or upgrade the database schema
    InitDb,

    /// Read stored events and batch statistics
    Query {
        #[command(subcommand)]
        query: QueryCommand,
    },
}

#[derive(Subcommand, Debug)]
enum QueryCommand {
    /// Events of one disaster type
    ByType {
        disaster_type: String,
        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// Events touching a location
    ByLocation {
        location: String,
        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// Events starting between two dates (YYYY-MM-DD)
    ByDateRange {
        start: NaiveDate,
        end: NaiveDate,
        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// Totals over everything stored
    Summary,

    /// Most recent batch statistics
    Batches {
        #[arg(short, long)]
        limit: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("disaster-ingest")
        .build()
        .merge_lookup(|key| std::env::var(key).ok())?;

    let _log_guard = init_logging(&log_config)?;

    let mut config = ConsumerConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            continuous,
            batch_size,
            poll_interval,
            source,
            input,
            max_batches,
            init_db,
            dry_run,
        } => {
            if continuous {
                config.consumer.continuous = true;
            }
            if let Some(batch_size) = batch_size {
                config.consumer.batch_size = batch_size;
            }
            if let Some(poll_interval) = poll_interval {
                config.consumer.poll_interval_secs = poll_interval;
            }
            if let Some(source) = source {
                config.consumer.source = source;
            }
            config.validate()?;

            run(&config, input, max_batches, init_db, dry_run).await?;
        },
        Command::InitDb => {
            let pool = db::connect(&config.database).await?;
            db::migrate(&pool).await?;
        },
        Command::Query { query } => {
            let pool = db::connect(&config.database).await?;
            let queries = EventQueries::new(pool);

            match query {
                QueryCommand::ByType {
                    disaster_type,
                    limit,
                } => print_json(&queries.by_type(&disaster_type, limit).await?)?,
                QueryCommand::ByLocation { location, limit } => {
                    print_json(&queries.by_location(&location, limit).await?)?
                },
                QueryCommand::ByDateRange { start, end, limit } => {
                    print_json(&queries.by_date_range(start, end, limit).await?)?
                },
                QueryCommand::Summary => print_json(&queries.summary().await?)?,
                QueryCommand::Batches { limit } => {
                    print_json(&queries.recent_batches(limit).await?)?
                },
            }
        },
    }

    Ok(())
}

async fn run(
    config: &ConsumerConfig,
    input: Option<PathBuf>,
    max_batches: Option<u64>,
    init_db: bool,
    dry_run: bool,
) -> Result<()> {
    info!(
        environment = ?config.environment,
        source = ?config.consumer.source,
        batch_size = config.consumer.batch_size,
        continuous = config.consumer.continuous,
        dry_run,
        "Starting disaster consumer"
    );

    let source = build_source(config.consumer.source, input, &config.kafka).await?;

    let sink: Arc<dyn StorageSink> = if dry_run {
        warn!("Dry run: records are kept in memory and discarded on exit");
        Arc::new(MemorySink::new())
    } else {
        let pool = db::connect(&config.database).await?;
        if init_db {
            db::migrate(&pool).await?;
        }
        Arc::new(PgSink::new(pool))
    };

    let mut orchestrator =
        BatchOrchestrator::new(source, sink, BatchOptions::from(&config.consumer));

    if config.consumer.continuous {
        let shutdown = CancellationToken::new();
        spawn_shutdown_listener(shutdown.clone());

        let options = ContinuousOptions {
            max_batches,
            ..ContinuousOptions::from(&config.consumer)
        };
        let summary = orchestrator.run_continuous(options, shutdown).await;
        print_json(&summary)?;
    } else {
        match orchestrator.run_batch().await {
            Ok(report) => print_json(&report)?,
            Err(err) => {
                print_json(&err.report)?;
                return Err(err.into());
            },
        }
    }

    Ok(())
}

async fn build_source(
    kind: SourceKind,
    input: Option<PathBuf>,
    kafka: &KafkaConfig,
) -> Result<Box<dyn MessageSource>> {
    match kind {
        SourceKind::Mock => Ok(Box::new(MockSource::sample())),
        SourceKind::File => {
            let path = input.context("--input is required with --source file")?;
            Ok(Box::new(JsonLinesSource::open(path).await?))
        },
        SourceKind::Kafka => kafka_source(kafka),
    }
}

#[cfg(feature = "kafka")]
fn kafka_source(config: &KafkaConfig) -> Result<Box<dyn MessageSource>> {
    Ok(Box::new(disaster_ingest::source::KafkaSource::connect(config)?))
}

#[cfg(not(feature = "kafka"))]
fn kafka_source(_config: &KafkaConfig) -> Result<Box<dyn MessageSource>> {
    anyhow::bail!(
        "built without the `kafka` feature; rebuild with `--features kafka` \
         or use `--source mock` / `--source file`"
    )
}

/// Cancel `token` on Ctrl+C or SIGTERM
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                },
                Err(e) => {
                    warn!(error = %e, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                },
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("Shutdown requested, finishing current batch");
        token.cancel();
    });
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
