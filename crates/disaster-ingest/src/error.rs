//! Ingestion error types

use disaster_common::DisasterError;
use thiserror::Error;

/// Errors raised by sources, sinks and the orchestrator
///
/// Validation failures are not errors at this level; they are reported per
/// packet as [`crate::validator::Rejection`].
#[derive(Error, Debug)]
pub enum IngestError {
    /// The message source cannot be reached; fatal for the current batch
    #[error("message source unavailable: {0}")]
    SourceUnavailable(String),

    /// The storage sink cannot be reached; fatal for the current batch
    #[error("storage sink unavailable: {0}")]
    SinkUnavailable(String),

    /// A single record could not be written
    #[error("failed to store packet {packet_id}: {message}")]
    Storage { packet_id: String, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Common(#[from] DisasterError),
}

impl IngestError {
    /// True for errors that abort the whole batch rather than one record
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            IngestError::SourceUnavailable(_) | IngestError::SinkUnavailable(_)
        )
    }

    pub fn storage(packet_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        IngestError::Storage {
            packet_id: packet_id.into(),
            message: message.to_string(),
        }
    }
}

/// Whether a sqlx error means the database itself is unreachable
pub(crate) fn is_connectivity_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
