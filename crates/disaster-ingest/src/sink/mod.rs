//! Storage sinks
//!
//! A sink persists disaster records with upsert semantics keyed by packet id,
//! appends one statistics row per batch, and optionally keeps rejected packets
//! for later inspection.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::IngestError;
use crate::stats::BatchStatistics;
use crate::transformer::DisasterRecord;
use crate::validator::Rejection;

pub mod memory;
pub mod postgres;

pub use memory::MemorySink;
pub use postgres::PgSink;

/// What an upsert did to the records table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[async_trait]
pub trait StorageSink: Send + Sync {
    /// Fails with [`IngestError::SinkUnavailable`] when the store cannot be reached
    async fn health_check(&self) -> Result<(), IngestError>;

    /// Insert the record, or overwrite every field of the existing row with
    /// the same packet id
    async fn upsert(&self, record: &DisasterRecord) -> Result<UpsertOutcome, IngestError>;

    /// Append the batch's statistics row
    ///
    /// Returns `false` if a row for this batch id already exists; the
    /// existing row is left untouched.
    async fn append_statistics(&self, stats: &BatchStatistics) -> Result<bool, IngestError>;

    /// Keep a rejected packet and its reason
    async fn record_rejection(
        &self,
        batch_id: Uuid,
        rejection: &Rejection,
    ) -> Result<(), IngestError>;
}
