//! Per-batch statistics
//!
//! Aggregates are computed only from records that actually reached the sink.
//! Rejected and failed packets contribute to the message counts and nothing
//! else.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transformer::DisasterRecord;

/// Bucket for stored records without a severity
pub const UNKNOWN_SEVERITY: &str = "unknown";

/// Message counts for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCounts {
    pub consumed: i64,
    pub validated: i64,
    pub rejected: i64,
    pub stored: i64,
    pub failed: i64,
}

/// One row of `consumption_statistics`; written once, never updated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub batch_id: Uuid,
    pub batch_timestamp: DateTime<Utc>,

    pub messages_consumed: i64,
    pub messages_validated: i64,
    pub messages_rejected: i64,
    pub messages_stored: i64,
    pub messages_failed: i64,

    pub by_disaster_type: BTreeMap<String, i64>,
    pub by_severity: BTreeMap<String, i64>,

    pub total_deaths: i64,
    pub total_injured: i64,
    pub total_displaced: i64,
    pub total_affected: i64,

    pub processing_time_seconds: f64,
}

/// Folds stored records into a [`BatchStatistics`]
#[derive(Debug)]
pub struct StatisticsAccumulator {
    batch_id: Uuid,
    started_at: DateTime<Utc>,
    by_disaster_type: BTreeMap<String, i64>,
    by_severity: BTreeMap<String, i64>,
    total_deaths: i64,
    total_injured: i64,
    total_displaced: i64,
    total_affected: i64,
    recorded: i64,
}

impl StatisticsAccumulator {
    pub fn new(batch_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            batch_id,
            started_at,
            by_disaster_type: BTreeMap::new(),
            by_severity: BTreeMap::new(),
            total_deaths: 0,
            total_injured: 0,
            total_displaced: 0,
            total_affected: 0,
            recorded: 0,
        }
    }

    /// Add a record that was successfully stored
    pub fn record(&mut self, record: &DisasterRecord) {
        *self
            .by_disaster_type
            .entry(record.disaster_type.clone())
            .or_insert(0) += 1;

        let severity = record
            .severity
            .map(|s| s.as_str())
            .unwrap_or(UNKNOWN_SEVERITY);
        *self.by_severity.entry(severity.to_string()).or_insert(0) += 1;

        self.total_deaths = self.total_deaths.saturating_add(record.deaths);
        self.total_injured = self.total_injured.saturating_add(record.injured);
        self.total_displaced = self.total_displaced.saturating_add(record.displaced);
        self.total_affected = self.total_affected.saturating_add(record.affected);
        self.recorded += 1;
    }

    /// Number of records folded in so far
    pub fn recorded(&self) -> i64 {
        self.recorded
    }

    /// Close the batch
    ///
    /// `counts.stored` is taken from the records actually recorded, so the
    /// snapshot can never disagree with its own breakdowns.
    pub fn finish(self, counts: MessageCounts, completed_at: DateTime<Utc>) -> BatchStatistics {
        let processing_time_seconds =
            (completed_at - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;

        BatchStatistics {
            batch_id: self.batch_id,
            batch_timestamp: self.started_at,
            messages_consumed: counts.consumed,
            messages_validated: counts.validated,
            messages_rejected: counts.rejected,
            messages_stored: self.recorded,
            messages_failed: counts.failed,
            by_disaster_type: self.by_disaster_type,
            by_severity: self.by_severity,
            total_deaths: self.total_deaths,
            total_injured: self.total_injured,
            total_displaced: self.total_displaced,
            total_affected: self.total_affected,
            processing_time_seconds,
        }
    }
}
