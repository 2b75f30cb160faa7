//! End-to-end batch tests against the in-memory sink

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use disaster_ingest::orchestrator::{BatchOptions, BatchOrchestrator, BatchState, ContinuousOptions};
use disaster_ingest::sink::{MemorySink, StorageSink, UpsertOutcome};
use disaster_ingest::source::{sample_packets, MessageSource, MockSource};
use disaster_ingest::stats::BatchStatistics;
use disaster_ingest::transformer::DisasterRecord;
use disaster_ingest::validator::{Rejection, ValidationError};
use disaster_ingest::{IngestError, RawPacket};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn options(batch_size: usize) -> BatchOptions {
    BatchOptions {
        batch_size,
        poll_timeout: Duration::from_millis(10),
        store_invalid_packets: true,
    }
}

fn kerala(deaths: i64) -> Value {
    json!({
        "packet_id": "disaster_event_floods_kerala_20240815_001",
        "packet_type": "discrete_disaster_event",
        "temporal": { "start_date": "2024-08-15", "end_date": "2024-08-17" },
        "spatial": { "primary_location": "Kerala", "affected_locations": ["Kerala", "Wayanad", "Idukki"] },
        "impact": { "deaths": deaths, "injured": 50, "displaced": 1000, "affected": 5000 },
        "metadata": { "disaster_type": "floods", "severity": "high" }
    })
}

fn orchestrator(
    packets: Vec<RawPacket>,
    sink: Arc<dyn StorageSink>,
    batch_size: usize,
) -> BatchOrchestrator {
    BatchOrchestrator::new(Box::new(MockSource::new(packets)), sink, options(batch_size))
}

// ============================================================================
// Test doubles
// ============================================================================

struct UnreachableSource;

#[async_trait]
impl MessageSource for UnreachableSource {
    async fn fetch(&mut self, _max: usize, _timeout: Duration) -> Result<Vec<RawPacket>, IngestError> {
        Err(IngestError::SourceUnavailable("broker localhost:9092 unreachable".into()))
    }

    fn name(&self) -> &'static str {
        "unreachable"
    }
}

/// Memory sink that can be told to refuse some packets, go down for chosen
/// health checks, or fail statistics writes
#[derive(Default)]
struct FaultySink {
    inner: MemorySink,
    refuse: HashSet<String>,
    /// 1-based health checks that fail; the rest succeed
    down_on_checks: Vec<usize>,
    checks: AtomicUsize,
    fail_statistics: bool,
}

#[async_trait]
impl StorageSink for FaultySink {
    async fn health_check(&self) -> Result<(), IngestError> {
        let check = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        if self.down_on_checks.contains(&check) {
            return Err(IngestError::SinkUnavailable("connection refused".into()));
        }
        Ok(())
    }

    async fn upsert(&self, record: &DisasterRecord) -> Result<UpsertOutcome, IngestError> {
        if self.refuse.contains(&record.packet_id) {
            return Err(IngestError::storage(&record.packet_id, "check constraint violated"));
        }
        self.inner.upsert(record).await
    }

    async fn append_statistics(&self, stats: &BatchStatistics) -> Result<bool, IngestError> {
        if self.fail_statistics {
            return Err(IngestError::SinkUnavailable("connection reset".into()));
        }
        self.inner.append_statistics(stats).await
    }

    async fn record_rejection(&self, batch_id: Uuid, rejection: &Rejection) -> Result<(), IngestError> {
        self.inner.record_rejection(batch_id, rejection).await
    }
}

// ============================================================================
// Single batch
// ============================================================================

#[tokio::test]
async fn test_mixed_batch_counts_and_statistics() -> Result<()> {
    let mut negative = kerala(25);
    negative["packet_id"] = json!("negative_deaths");
    negative["impact"]["deaths"] = json!(-4);

    let mut untyped = kerala(25);
    untyped["packet_id"] = json!("missing_type");
    untyped["metadata"].as_object_mut().unwrap().remove("disaster_type");

    let sink = Arc::new(MemorySink::new());
    let report = orchestrator(vec![negative, untyped, kerala(25)], sink.clone(), 10)
        .run_batch()
        .await?;

    assert_eq!(report.state, BatchState::Done);
    assert_eq!(report.fetched, 3);
    assert_eq!(report.validated, 1);
    assert_eq!(report.rejected, 2);
    assert_eq!(report.stored, 1);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.failed, 0);

    assert!(matches!(report.rejections[0].reason, ValidationError::NegativeCounter { .. }));
    assert!(matches!(report.rejections[1].reason, ValidationError::MissingField { .. }));
    assert_eq!(report.rejections[0].packet_id.as_deref(), Some("negative_deaths"));

    let stats = report.statistics.as_ref().unwrap();
    assert_eq!(stats.messages_consumed, 3);
    assert_eq!(stats.messages_validated, 1);
    assert_eq!(stats.messages_rejected, 2);
    assert_eq!(stats.messages_stored, 1);
    assert_eq!(stats.total_deaths, 25);
    assert_eq!(stats.total_injured, 50);
    assert_eq!(stats.total_displaced, 1000);
    assert_eq!(stats.total_affected, 5000);
    assert_eq!(stats.by_disaster_type.get("floods"), Some(&1));
    assert_eq!(stats.by_severity.get("high"), Some(&1));

    let persisted = sink.statistics().await;
    assert_eq!(persisted.len(), 1);
    assert_eq!(&persisted[0], stats);

    assert_eq!(sink.events().await.len(), 1);
    assert_eq!(sink.rejections().await.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_reingest_overwrites_single_row() -> Result<()> {
    let sink = Arc::new(MemorySink::new());

    let first = orchestrator(vec![kerala(25)], sink.clone(), 10).run_batch().await?;
    assert_eq!(first.inserted, 1);

    let second = orchestrator(vec![kerala(30)], sink.clone(), 10).run_batch().await?;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 1);

    let events = sink.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].deaths, 30);
    assert_eq!(events[0].raw_packet["impact"]["deaths"], 30);

    Ok(())
}

#[tokio::test]
async fn test_empty_fetch_writes_nothing() -> Result<()> {
    let sink = Arc::new(MemorySink::new());
    let report = orchestrator(Vec::new(), sink.clone(), 10).run_batch().await?;

    assert_eq!(report.state, BatchState::Done);
    assert_eq!(report.fetched, 0);
    assert_eq!(report.validated, 0);
    assert_eq!(report.rejected, 0);
    assert_eq!(report.stored, 0);
    assert_eq!(report.failed, 0);
    let stats = report.statistics.as_ref().unwrap();
    assert_eq!(stats.batch_id, report.batch_id);
    assert_eq!(stats.messages_consumed, 0);
    assert_eq!(stats.messages_stored, 0);
    assert_eq!(stats.total_deaths, 0);
    assert!(stats.by_disaster_type.is_empty());
    assert!(sink.statistics().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_all_rejected_still_records_statistics() -> Result<()> {
    let sink = Arc::new(MemorySink::new());
    let report = orchestrator(vec![json!("garbage"), json!({})], sink.clone(), 10)
        .run_batch()
        .await?;

    assert_eq!(report.state, BatchState::Done);
    assert_eq!(report.rejected, 2);
    assert_eq!(report.stored, 0);

    let stats = sink.statistics().await;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].messages_consumed, 2);
    assert_eq!(stats[0].messages_stored, 0);
    assert!(stats[0].by_disaster_type.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_source_unavailable_fails_at_fetching() {
    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = BatchOrchestrator::new(Box::new(UnreachableSource), sink.clone(), options(10));

    let err = orchestrator.run_batch().await.unwrap_err();

    assert_eq!(err.step, BatchState::Fetching);
    assert!(matches!(err.error, IngestError::SourceUnavailable(_)));
    assert_eq!(err.report.state, BatchState::Failed);
    assert_eq!(err.report.failed_at, Some(BatchState::Fetching));
    assert!(sink.statistics().await.is_empty());
}

#[tokio::test]
async fn test_sink_down_fails_before_fetching() -> Result<()> {
    let sink = Arc::new(FaultySink {
        down_on_checks: vec![1],
        ..Default::default()
    });
    let mut orchestrator = orchestrator(sample_packets(), sink.clone(), 10);

    let err = orchestrator.run_batch().await.unwrap_err();

    assert_eq!(err.step, BatchState::Fetching);
    assert!(matches!(err.error, IngestError::SinkUnavailable(_)));
    assert_eq!(err.report.fetched, 0);
    assert!(sink.inner.events().await.is_empty());

    // nothing was taken off the source, so the next batch gets every packet
    let report = orchestrator.run_batch().await?;
    assert_eq!(report.fetched, 3);
    assert_eq!(report.stored, 3);

    Ok(())
}

#[tokio::test]
async fn test_sink_lost_during_fetch_fails_at_storing() {
    let sink = Arc::new(FaultySink {
        down_on_checks: vec![2],
        ..Default::default()
    });

    let err = orchestrator(sample_packets(), sink.clone(), 10)
        .run_batch()
        .await
        .unwrap_err();

    assert_eq!(err.step, BatchState::Storing);
    assert!(err.error.is_unavailable());
    assert_eq!(err.report.validated, 3);
    assert_eq!(err.report.stored, 0);
    assert!(sink.inner.events().await.is_empty());
    assert!(sink.inner.statistics().await.is_empty());
}

#[tokio::test]
async fn test_record_failure_counted_and_excluded_from_statistics() -> Result<()> {
    let sink = Arc::new(FaultySink {
        refuse: HashSet::from(["disaster_event_cyclone_odisha_20240820_001".to_string()]),
        ..Default::default()
    });

    let report = orchestrator(sample_packets(), sink.clone(), 10).run_batch().await?;

    assert_eq!(report.state, BatchState::Done);
    assert_eq!(report.validated, 3);
    assert_eq!(report.stored, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].packet_id, "disaster_event_cyclone_odisha_20240820_001");

    let stats = report.statistics.as_ref().unwrap();
    assert_eq!(stats.messages_stored, 2);
    assert_eq!(stats.messages_failed, 1);
    assert_eq!(stats.by_disaster_type.get("cyclones"), None);
    assert_eq!(stats.total_deaths, 25);
    assert_eq!(stats.by_disaster_type.values().sum::<i64>(), stats.messages_stored);

    Ok(())
}

#[tokio::test]
async fn test_statistics_failure_fails_at_aggregating() {
    let sink = Arc::new(FaultySink {
        fail_statistics: true,
        ..Default::default()
    });

    let err = orchestrator(sample_packets(), sink.clone(), 10)
        .run_batch()
        .await
        .unwrap_err();

    assert_eq!(err.step, BatchState::Aggregating);
    assert_eq!(err.report.stored, 3);
    assert!(sink.inner.statistics().await.is_empty());
}

#[tokio::test]
async fn test_each_batch_counts_only_its_own_packets() -> Result<()> {
    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = orchestrator(sample_packets(), sink.clone(), 2);

    let first = orchestrator.run_batch().await?;
    let second = orchestrator.run_batch().await?;

    assert_ne!(first.batch_id, second.batch_id);

    let stats = sink.statistics().await;
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].messages_stored, 2);
    assert_eq!(stats[1].messages_stored, 1);
    assert_eq!(
        stats.iter().map(|s| s.total_deaths).sum::<i64>(),
        25 + 12
    );

    Ok(())
}

#[tokio::test]
async fn test_invalid_packets_not_kept_when_disabled() -> Result<()> {
    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = BatchOrchestrator::new(
        Box::new(MockSource::new(vec![json!({"packet_id": "bad"})])),
        sink.clone(),
        BatchOptions {
            store_invalid_packets: false,
            ..options(10)
        },
    );

    let report = orchestrator.run_batch().await?;

    assert_eq!(report.rejected, 1);
    assert!(sink.rejections().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_report_serializes_for_callers() -> Result<()> {
    let sink = Arc::new(MemorySink::new());
    let report = orchestrator(sample_packets(), sink, 10).run_batch().await?;

    let json = serde_json::to_value(&report)?;
    assert_eq!(json["state"], "done");
    assert_eq!(json["fetched"], 3);
    assert_eq!(json["stored"], 3);
    assert_eq!(json["statistics"]["by_disaster_type"]["earthquakes"], 1);

    Ok(())
}

// ============================================================================
// Continuous mode
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_continuous_stops_after_max_batches() {
    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = orchestrator(sample_packets(), sink.clone(), 1);

    let summary = orchestrator
        .run_continuous(
            ContinuousOptions {
                poll_interval: Duration::from_secs(5),
                failure_threshold: 3,
                max_batches: Some(5),
            },
            CancellationToken::new(),
        )
        .await;

    assert_eq!(summary.batches, 5);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.stored, 3);
    // two trailing empty polls write no statistics
    assert_eq!(sink.statistics().await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_stops_on_cancel() {
    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = orchestrator(sample_packets(), sink.clone(), 10);

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let summary = orchestrator
        .run_continuous(
            ContinuousOptions {
                poll_interval: Duration::from_secs(3600),
                failure_threshold: 3,
                max_batches: None,
            },
            shutdown,
        )
        .await;

    assert_eq!(summary.batches, 1);
    assert_eq!(summary.stored, 3);
}

#[tokio::test]
async fn test_continuous_not_started_when_already_cancelled() {
    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = orchestrator(sample_packets(), sink.clone(), 10);

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let summary = orchestrator
        .run_continuous(
            ContinuousOptions {
                poll_interval: Duration::from_secs(1),
                failure_threshold: 3,
                max_batches: None,
            },
            shutdown,
        )
        .await;

    assert_eq!(summary.batches, 0);
    assert!(sink.events().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_continuous_moves_past_failed_batches() {
    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = BatchOrchestrator::new(Box::new(UnreachableSource), sink, options(10));

    let summary = orchestrator
        .run_continuous(
            ContinuousOptions {
                poll_interval: Duration::from_secs(5),
                failure_threshold: 2,
                max_batches: Some(3),
            },
            CancellationToken::new(),
        )
        .await;

    assert_eq!(summary.batches, 3);
    assert_eq!(summary.failed_batches, 3);
    assert_eq!(summary.succeeded, 0);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_recovers_after_sink_outage() {
    let sink = Arc::new(FaultySink {
        down_on_checks: vec![1],
        ..Default::default()
    });
    let mut orchestrator = orchestrator(sample_packets(), sink.clone(), 10);

    let summary = orchestrator
        .run_continuous(
            ContinuousOptions {
                poll_interval: Duration::from_secs(5),
                failure_threshold: 3,
                max_batches: Some(3),
            },
            CancellationToken::new(),
        )
        .await;

    assert_eq!(summary.batches, 3);
    assert_eq!(summary.failed_batches, 1);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.stored, 3);
    assert_eq!(sink.inner.events().await.len(), 3);
    assert_eq!(sink.inner.statistics().await.len(), 1);
}
