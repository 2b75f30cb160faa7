//! Disaster Event Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Consumes disaster event packets from a message source, validates and
//! flattens them, upserts them into Postgres keyed by packet id, and appends
//! one statistics row per batch.
//!
//! # Pipeline
//!
//! - **Source** ([`source`]): Kafka, a JSON lines file, or built-in samples
//! - **Validator** ([`validator`]): typed packet or a rejection reason
//! - **Transformer** ([`transformer`]): packet to flat storage record
//! - **Sink** ([`sink`]): idempotent upsert plus append-only statistics
//! - **Statistics** ([`stats`]): per-batch rollup over stored records
//! - **Orchestrator** ([`orchestrator`]): one batch, or a continuous loop
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use disaster_ingest::config::ConsumerConfig;
//! use disaster_ingest::orchestrator::{BatchOptions, BatchOrchestrator};
//! use disaster_ingest::sink::PgSink;
//! use disaster_ingest::source::MockSource;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConsumerConfig::from_env()?;
//!     let pool = disaster_ingest::db::connect(&config.database).await?;
//!     disaster_ingest::db::migrate(&pool).await?;
//!
//!     let mut orchestrator = BatchOrchestrator::new(
//!         Box::new(MockSource::sample()),
//!         Arc::new(PgSink::new(pool)),
//!         BatchOptions::from(&config.consumer),
//!     );
//!     let report = orchestrator.run_batch().await?;
//!     println!("stored {} of {}", report.stored, report.fetched);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod orchestrator;
pub mod packet;
pub mod queries;
pub mod sink;
pub mod source;
pub mod stats;
pub mod transformer;
pub mod validator;

pub use error::IngestError;
pub use orchestrator::{BatchError, BatchOrchestrator, BatchReport, BatchState};
pub use packet::{DisasterPacket, RawPacket, Severity};
