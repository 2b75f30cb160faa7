//! Read-back queries over stored events and batch statistics

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use disaster_common::DisasterError;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::IngestError;

/// Limit applied when the caller gives none
pub const DEFAULT_QUERY_LIMIT: i64 = 100;

/// Upper bound on any query limit
pub const MAX_QUERY_LIMIT: i64 = 1000;

const EVENT_COLUMNS: &str = "packet_id, disaster_type, event_name, start_date, end_date, \
     duration_days, primary_location, affected_locations, location_count, \
     deaths, injured, displaced, affected, severity, source_url, source_domain, \
     priority, ingestion_timestamp, created_at, updated_at, raw_packet";

/// Clamp a requested limit to `1..=MAX_QUERY_LIMIT`
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_QUERY_LIMIT)
        .clamp(1, MAX_QUERY_LIMIT)
}

/// `%`, `_` and `\` in `term` match literally inside a `LIKE` pattern
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StoredEvent {
    pub packet_id: String,
    pub disaster_type: String,
    pub event_name: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub duration_days: Option<i32>,
    pub primary_location: Option<String>,
    pub affected_locations: Vec<String>,
    pub location_count: i32,
    pub deaths: i64,
    pub injured: i64,
    pub displaced: i64,
    pub affected: i64,
    pub severity: Option<String>,
    pub source_url: Option<String>,
    pub source_domain: Option<String>,
    pub priority: Option<String>,
    pub ingestion_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub raw_packet: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StoredBatch {
    pub batch_id: Uuid,
    pub batch_timestamp: DateTime<Utc>,
    pub messages_consumed: i64,
    pub messages_validated: i64,
    pub messages_rejected: i64,
    pub messages_stored: i64,
    pub messages_failed: i64,
    pub by_disaster_type: serde_json::Value,
    pub by_severity: serde_json::Value,
    pub total_deaths: i64,
    pub total_injured: i64,
    pub total_displaced: i64,
    pub total_affected: i64,
    pub processing_time_seconds: f64,
}

/// Aggregate view over everything stored
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventSummary {
    pub total_events: i64,
    pub by_disaster_type: BTreeMap<String, i64>,
    pub by_severity: BTreeMap<String, i64>,
    pub total_deaths: i64,
    pub total_injured: i64,
    pub total_displaced: i64,
    pub total_affected: i64,
    pub earliest_event: Option<NaiveDate>,
    pub latest_event: Option<NaiveDate>,
    pub batches_recorded: i64,
}

#[derive(FromRow)]
struct EventTotals {
    total_events: i64,
    total_deaths: i64,
    total_injured: i64,
    total_displaced: i64,
    total_affected: i64,
    earliest_event: Option<NaiveDate>,
    latest_event: Option<NaiveDate>,
}

pub struct EventQueries {
    pool: PgPool,
}

impl EventQueries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn by_type(
        &self,
        disaster_type: &str,
        limit: Option<i64>,
    ) -> Result<Vec<StoredEvent>, IngestError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM disaster_events \
             WHERE disaster_type = $1 ORDER BY start_date DESC LIMIT $2"
        );
        Ok(sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(disaster_type)
            .bind(clamp_limit(limit))
            .fetch_all(&self.pool)
            .await?)
    }

    /// Events whose primary location contains `location` (case-insensitive)
    /// or whose affected locations include it exactly
    pub async fn by_location(
        &self,
        location: &str,
        limit: Option<i64>,
    ) -> Result<Vec<StoredEvent>, IngestError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM disaster_events \
             WHERE primary_location ILIKE $1 ESCAPE '\\' OR $2 = ANY(affected_locations) \
             ORDER BY start_date DESC LIMIT $3"
        );
        Ok(sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(format!("%{}%", escape_like(location.trim())))
            .bind(location.trim())
            .bind(clamp_limit(limit))
            .fetch_all(&self.pool)
            .await?)
    }

    /// Events starting within `[start, end]`
    pub async fn by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        limit: Option<i64>,
    ) -> Result<Vec<StoredEvent>, IngestError> {
        if start > end {
            return Err(DisasterError::Parse(format!(
                "start date {start} is after end date {end}"
            ))
            .into());
        }

        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM disaster_events \
             WHERE start_date BETWEEN $1 AND $2 \
             ORDER BY start_date DESC LIMIT $3"
        );
        Ok(sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(start)
            .bind(end)
            .bind(clamp_limit(limit))
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn summary(&self) -> Result<EventSummary, IngestError> {
        let totals: EventTotals = sqlx::query_as(
            "SELECT COUNT(*) AS total_events, \
                    COALESCE(SUM(deaths), 0)::BIGINT AS total_deaths, \
                    COALESCE(SUM(injured), 0)::BIGINT AS total_injured, \
                    COALESCE(SUM(displaced), 0)::BIGINT AS total_displaced, \
                    COALESCE(SUM(affected), 0)::BIGINT AS total_affected, \
                    MIN(start_date) AS earliest_event, \
                    MAX(start_date) AS latest_event \
             FROM disaster_events",
        )
        .fetch_one(&self.pool)
        .await?;

        let by_disaster_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT disaster_type, COUNT(*) FROM disaster_events GROUP BY disaster_type",
        )
        .fetch_all(&self.pool)
        .await?;

        let by_severity: Vec<(String, i64)> = sqlx::query_as(
            "SELECT COALESCE(severity, 'unknown'), COUNT(*) FROM disaster_events \
             GROUP BY COALESCE(severity, 'unknown')",
        )
        .fetch_all(&self.pool)
        .await?;

        let batches_recorded: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM consumption_statistics")
                .fetch_one(&self.pool)
                .await?;

        Ok(EventSummary {
            total_events: totals.total_events,
            by_disaster_type: by_disaster_type.into_iter().collect(),
            by_severity: by_severity.into_iter().collect(),
            total_deaths: totals.total_deaths,
            total_injured: totals.total_injured,
            total_displaced: totals.total_displaced,
            total_affected: totals.total_affected,
            earliest_event: totals.earliest_event,
            latest_event: totals.latest_event,
            batches_recorded,
        })
    }

    /// Most recent batch statistics first
    pub async fn recent_batches(
        &self,
        limit: Option<i64>,
    ) -> Result<Vec<StoredBatch>, IngestError> {
        Ok(sqlx::query_as::<_, StoredBatch>(
            "SELECT batch_id, batch_timestamp, messages_consumed, messages_validated, \
                    messages_rejected, messages_stored, messages_failed, by_disaster_type, \
                    by_severity, total_deaths, total_injured, total_displaced, total_affected, \
                    processing_time_seconds \
             FROM consumption_statistics ORDER BY batch_timestamp DESC LIMIT $1",
        )
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?)
    }
}
