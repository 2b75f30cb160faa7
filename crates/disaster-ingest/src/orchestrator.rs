//! Batch orchestration
//!
//! One batch walks `Fetching -> Validating -> Transforming -> Storing ->
//! Aggregating -> Done`. Each step consumes the previous step's complete
//! output. An unreachable source or sink moves the batch to `Failed`; the
//! continuous loop then waits for the next poll instead of retrying the same
//! batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::error::IngestError;
use crate::sink::{StorageSink, UpsertOutcome};
use crate::source::MessageSource;
use crate::stats::{BatchStatistics, MessageCounts, StatisticsAccumulator};
use crate::transformer::transform_all;
use crate::validator::{partition, Rejection};

/// Where a batch is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Fetching,
    Validating,
    Transforming,
    Storing,
    Aggregating,
    Done,
    Failed,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Fetching => "fetching",
            BatchState::Validating => "validating",
            BatchState::Transforming => "transforming",
            BatchState::Storing => "storing",
            BatchState::Aggregating => "aggregating",
            BatchState::Done => "done",
            BatchState::Failed => "failed",
        }
    }

    /// The step after this one on the success path
    pub fn next(self) -> Self {
        match self {
            BatchState::Fetching => BatchState::Validating,
            BatchState::Validating => BatchState::Transforming,
            BatchState::Transforming => BatchState::Storing,
            BatchState::Storing => BatchState::Aggregating,
            BatchState::Aggregating => BatchState::Done,
            BatchState::Done => BatchState::Done,
            BatchState::Failed => BatchState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Done | BatchState::Failed)
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record the sink refused
#[derive(Debug, Clone, Serialize)]
pub struct StoreFailure {
    pub packet_id: String,
    pub error: String,
}

/// Per-batch summary handed back to callers
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub state: BatchState,
    /// Step that failed, when `state` is `Failed`
    pub failed_at: Option<BatchState>,

    pub fetched: usize,
    pub validated: usize,
    pub rejected: usize,
    pub rejections: Vec<Rejection>,
    pub stored: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub failures: Vec<StoreFailure>,

    pub statistics: Option<BatchStatistics>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchReport {
    fn new(batch_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            batch_id,
            state: BatchState::Fetching,
            failed_at: None,
            fetched: 0,
            validated: 0,
            rejected: 0,
            rejections: Vec::new(),
            stored: 0,
            inserted: 0,
            updated: 0,
            failed: 0,
            failures: Vec::new(),
            statistics: None,
            started_at,
            completed_at: None,
        }
    }

    fn advance(&mut self) {
        self.state = self.state.next();
        debug!(batch_id = %self.batch_id, state = %self.state, "batch step");
    }

    fn counts(&self) -> MessageCounts {
        MessageCounts {
            consumed: self.fetched as i64,
            validated: self.validated as i64,
            rejected: self.rejected as i64,
            stored: self.stored as i64,
            failed: self.failed as i64,
        }
    }
}

/// A batch that ended in `Failed`
#[derive(Debug, Error)]
#[error("batch {} failed while {step}: {error}", .report.batch_id)]
pub struct BatchError {
    pub step: BatchState,
    #[source]
    pub error: IngestError,
    pub report: Box<BatchReport>,
}

/// Per-batch knobs
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub poll_timeout: Duration,
    pub store_invalid_packets: bool,
}

impl From<&BatchConfig> for BatchOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            poll_timeout: config.poll_timeout(),
            store_invalid_packets: config.store_invalid_packets,
        }
    }
}

/// Loop knobs for [`BatchOrchestrator::run_continuous`]
#[derive(Debug, Clone)]
pub struct ContinuousOptions {
    pub poll_interval: Duration,
    /// Consecutive failed batches before an alert is logged
    pub failure_threshold: u32,
    /// Stop after this many batches; `None` runs until cancelled
    pub max_batches: Option<u64>,
}

impl From<&BatchConfig> for ContinuousOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            failure_threshold: config.failure_threshold,
            max_batches: None,
        }
    }
}

/// Totals across a continuous run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContinuousSummary {
    pub batches: u64,
    pub succeeded: u64,
    pub failed_batches: u64,
    pub fetched: u64,
    pub rejected: u64,
    pub stored: u64,
    pub store_failures: u64,
}

impl ContinuousSummary {
    fn absorb(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.fetched += report.fetched as u64;
        self.rejected += report.rejected as u64;
        self.stored += report.stored as u64;
        self.store_failures += report.failed as u64;
        match report.state {
            BatchState::Failed => self.failed_batches += 1,
            _ => self.succeeded += 1,
        }
    }
}

/// Drives batches from a source into a sink
pub struct BatchOrchestrator {
    source: Box<dyn MessageSource>,
    sink: Arc<dyn StorageSink>,
    options: BatchOptions,
}

impl BatchOrchestrator {
    pub fn new(
        source: Box<dyn MessageSource>,
        sink: Arc<dyn StorageSink>,
        options: BatchOptions,
    ) -> Self {
        Self {
            source,
            sink,
            options,
        }
    }

    /// Run one batch to `Done` or `Failed`
    ///
    /// An unreachable sink fails the batch before the source is touched. An
    /// empty fetch completes immediately with zero counts and a zero-valued
    /// statistics snapshot, and writes no statistics row.
    #[tracing::instrument(skip_all, fields(source = self.source.name(), batch_id = tracing::field::Empty))]
    pub async fn run_batch(&mut self) -> Result<BatchReport, BatchError> {
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::Span::current().record("batch_id", tracing::field::display(batch_id));

        let mut report = BatchReport::new(batch_id, started_at);

        // Fetching. Sources dequeue (and Kafka commits) on fetch, so the sink
        // must be reachable before anything is taken off the source.
        if let Err(e) = self.sink.health_check().await {
            return Err(fail(report, e));
        }

        let raw = match self
            .source
            .fetch(self.options.batch_size, self.options.poll_timeout)
            .await
        {
            Ok(raw) => raw,
            Err(e) => return Err(fail(report, e)),
        };
        report.fetched = raw.len();

        if raw.is_empty() {
            info!("No messages available");
            report.statistics = Some(
                StatisticsAccumulator::new(batch_id, started_at)
                    .finish(MessageCounts::default(), Utc::now()),
            );
            report.state = BatchState::Done;
            report.completed_at = Some(Utc::now());
            return Ok(report);
        }

        // Validating
        report.advance();
        let partitioned = partition(raw);
        report.validated = partitioned.accepted.len();
        report.rejected = partitioned.rejected.len();
        report.rejections = partitioned.rejected;

        if report.rejected > 0 {
            warn!(
                rejected = report.rejected,
                validated = report.validated,
                "Rejected invalid packets"
            );
        }

        // Transforming
        report.advance();
        let records = transform_all(&partitioned.accepted);

        // Storing. The sink may have gone away while the fetch was waiting.
        report.advance();
        if let Err(e) = self.sink.health_check().await {
            return Err(fail(report, e));
        }

        let mut accumulator = StatisticsAccumulator::new(batch_id, started_at);

        for record in &records {
            match self.sink.upsert(record).await {
                Ok(outcome) => {
                    accumulator.record(record);
                    report.stored += 1;
                    match outcome {
                        UpsertOutcome::Inserted => report.inserted += 1,
                        UpsertOutcome::Updated => report.updated += 1,
                    }
                },
                Err(e) => {
                    error!(
                        packet_id = %record.packet_id,
                        error = %e,
                        "Failed to store record"
                    );
                    report.failed += 1;
                    report.failures.push(StoreFailure {
                        packet_id: record.packet_id.clone(),
                        error: e.to_string(),
                    });
                },
            }
        }

        if self.options.store_invalid_packets {
            for rejection in &report.rejections {
                if let Err(e) = self.sink.record_rejection(batch_id, rejection).await {
                    warn!(
                        packet_id = ?rejection.packet_id,
                        error = %e,
                        "Failed to keep rejected packet"
                    );
                }
            }
        }

        // Aggregating
        report.advance();
        let statistics = accumulator.finish(report.counts(), Utc::now());
        let appended = self.sink.append_statistics(&statistics).await;
        report.statistics = Some(statistics);

        match appended {
            Ok(true) => {},
            Ok(false) => warn!("Statistics for this batch were already recorded"),
            Err(e) => return Err(fail(report, e)),
        }

        report.advance();
        report.completed_at = Some(Utc::now());

        info!(
            fetched = report.fetched,
            validated = report.validated,
            rejected = report.rejected,
            stored = report.stored,
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            "Batch complete"
        );

        Ok(report)
    }

    /// Run batches until cancelled, sleeping `poll_interval` between them
    ///
    /// A failed batch is logged and counted; the loop moves on to the next
    /// poll. Reaching `failure_threshold` consecutive failures logs an alert.
    pub async fn run_continuous(
        &mut self,
        options: ContinuousOptions,
        shutdown: CancellationToken,
    ) -> ContinuousSummary {
        let mut summary = ContinuousSummary::default();
        let mut consecutive_failures: u32 = 0;
        let alert_at = options.failure_threshold.max(1);

        info!(
            poll_interval_secs = options.poll_interval.as_secs_f64(),
            batch_size = self.options.batch_size,
            "Continuous consumption started"
        );

        while !shutdown.is_cancelled() {
            match self.run_batch().await {
                Ok(report) => {
                    consecutive_failures = 0;
                    summary.absorb(&report);
                },
                Err(err) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    summary.absorb(&err.report);

                    if consecutive_failures == alert_at {
                        error!(
                            consecutive_failures,
                            error = %err.error,
                            "Consecutive batch failures reached alert threshold"
                        );
                    } else {
                        warn!(
                            consecutive_failures,
                            step = %err.step,
                            error = %err.error,
                            "Batch failed, waiting for next poll"
                        );
                    }
                },
            }

            if options.max_batches.is_some_and(|max| summary.batches >= max) {
                break;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(options.poll_interval) => {},
            }
        }

        info!(
            batches = summary.batches,
            succeeded = summary.succeeded,
            failed = summary.failed_batches,
            stored = summary.stored,
            "Continuous consumption stopped"
        );

        summary
    }
}

fn fail(mut report: BatchReport, error: IngestError) -> BatchError {
    let step = report.state;
    error!(step = %step, error = %error, "Batch failed");

    report.failed_at = Some(step);
    report.state = BatchState::Failed;
    report.completed_at = Some(Utc::now());

    BatchError {
        step,
        error,
        report: Box::new(report),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_state_sequence() {
        let mut state = BatchState::Fetching;
        let mut seen = vec![state];
        while !state.is_terminal() {
            state = state.next();
            seen.push(state);
        }

        assert_eq!(
            seen,
            vec![
                BatchState::Fetching,
                BatchState::Validating,
                BatchState::Transforming,
                BatchState::Storing,
                BatchState::Aggregating,
                BatchState::Done,
            ]
        );
        assert_eq!(BatchState::Failed.next(), BatchState::Failed);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&BatchState::Aggregating).unwrap(),
            "\"aggregating\""
        );
        assert_eq!(BatchState::Storing.to_string(), "storing");
    }
}
