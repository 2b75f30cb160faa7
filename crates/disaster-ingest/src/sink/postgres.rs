//! Postgres storage sink

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{StorageSink, UpsertOutcome};
use crate::error::{is_connectivity_error, IngestError};
use crate::stats::BatchStatistics;
use crate::transformer::DisasterRecord;
use crate::validator::Rejection;

const UPSERT_EVENT: &str = r#"
INSERT INTO disaster_events (
    packet_id, packet_type, disaster_type, event_name,
    start_date, end_date, duration_days,
    primary_location, affected_locations, location_count,
    deaths, injured, displaced, affected, damage_amount,
    severity, source_url, source_domain, source_title, relevance_score,
    priority, retention_days, raw_packet
)
VALUES (
    $1, $2, $3, $4,
    $5, $6, $7,
    $8, $9, $10,
    $11, $12, $13, $14, $15,
    $16, $17, $18, $19, $20,
    $21, $22, $23
)
ON CONFLICT (packet_id) DO UPDATE SET
    packet_type = EXCLUDED.packet_type,
    disaster_type = EXCLUDED.disaster_type,
    event_name = EXCLUDED.event_name,
    start_date = EXCLUDED.start_date,
    end_date = EXCLUDED.end_date,
    duration_days = EXCLUDED.duration_days,
    primary_location = EXCLUDED.primary_location,
    affected_locations = EXCLUDED.affected_locations,
    location_count = EXCLUDED.location_count,
    deaths = EXCLUDED.deaths,
    injured = EXCLUDED.injured,
    displaced = EXCLUDED.displaced,
    affected = EXCLUDED.affected,
    damage_amount = EXCLUDED.damage_amount,
    severity = EXCLUDED.severity,
    source_url = EXCLUDED.source_url,
    source_domain = EXCLUDED.source_domain,
    source_title = EXCLUDED.source_title,
    relevance_score = EXCLUDED.relevance_score,
    priority = EXCLUDED.priority,
    retention_days = EXCLUDED.retention_days,
    raw_packet = EXCLUDED.raw_packet,
    ingestion_timestamp = NOW(),
    updated_at = NOW()
RETURNING (xmax = 0) AS inserted
"#;

const INSERT_STATISTICS: &str = r#"
INSERT INTO consumption_statistics (
    batch_id, batch_timestamp,
    messages_consumed, messages_validated, messages_rejected, messages_stored, messages_failed,
    by_disaster_type, by_severity,
    total_deaths, total_injured, total_displaced, total_affected,
    processing_time_seconds
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
ON CONFLICT (batch_id) DO NOTHING
"#;

const INSERT_REJECTION: &str = r#"
INSERT INTO invalid_packets (batch_id, packet_id, reason_kind, reason, details, raw_packet)
VALUES ($1, $2, $3, $4, $5, $6)
"#;

/// Sink backed by the `disaster_events`, `consumption_statistics` and
/// `invalid_packets` tables
#[derive(Debug, Clone)]
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StorageSink for PgSink {
    async fn health_check(&self) -> Result<(), IngestError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| IngestError::SinkUnavailable(e.to_string()))
    }

    async fn upsert(&self, record: &DisasterRecord) -> Result<UpsertOutcome, IngestError> {
        let inserted: bool = sqlx::query_scalar(UPSERT_EVENT)
            .bind(&record.packet_id)
            .bind(&record.packet_type)
            .bind(&record.disaster_type)
            .bind(&record.event_name)
            .bind(record.start_date)
            .bind(record.end_date)
            .bind(record.duration_days)
            .bind(&record.primary_location)
            .bind(&record.affected_locations)
            .bind(record.location_count)
            .bind(record.deaths)
            .bind(record.injured)
            .bind(record.displaced)
            .bind(record.affected)
            .bind(record.damage_amount)
            .bind(record.severity.map(|s| s.as_str()))
            .bind(&record.source_url)
            .bind(&record.source_domain)
            .bind(&record.source_title)
            .bind(record.relevance_score)
            .bind(&record.priority)
            .bind(record.retention_days)
            .bind(&record.raw_packet)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_connectivity_error(&e) {
                    IngestError::SinkUnavailable(e.to_string())
                } else {
                    IngestError::storage(&record.packet_id, e)
                }
            })?;

        debug!(packet_id = %record.packet_id, inserted, "upserted disaster event");

        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn append_statistics(&self, stats: &BatchStatistics) -> Result<bool, IngestError> {
        let result = sqlx::query(INSERT_STATISTICS)
            .bind(stats.batch_id)
            .bind(stats.batch_timestamp)
            .bind(stats.messages_consumed)
            .bind(stats.messages_validated)
            .bind(stats.messages_rejected)
            .bind(stats.messages_stored)
            .bind(stats.messages_failed)
            .bind(Json(&stats.by_disaster_type))
            .bind(Json(&stats.by_severity))
            .bind(stats.total_deaths)
            .bind(stats.total_injured)
            .bind(stats.total_displaced)
            .bind(stats.total_affected)
            .bind(stats.processing_time_seconds)
            .execute(&self.pool)
            .await?;

        let written = result.rows_affected() == 1;
        if !written {
            warn!(batch_id = %stats.batch_id, "statistics row already exists, skipping");
        }
        Ok(written)
    }

    async fn record_rejection(
        &self,
        batch_id: Uuid,
        rejection: &Rejection,
    ) -> Result<(), IngestError> {
        sqlx::query(INSERT_REJECTION)
            .bind(batch_id)
            .bind(&rejection.packet_id)
            .bind(rejection.reason.kind())
            .bind(rejection.reason.to_string())
            .bind(Json(&rejection.reason))
            .bind(&rejection.raw)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
