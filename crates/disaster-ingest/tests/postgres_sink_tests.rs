//! Postgres sink and query tests
//!
//! Each test starts its own container, so they are independent but slow.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use common::TestPostgres;
use disaster_ingest::orchestrator::{BatchOptions, BatchOrchestrator, BatchState};
use disaster_ingest::queries::EventQueries;
use disaster_ingest::sink::{PgSink, StorageSink, UpsertOutcome};
use disaster_ingest::source::{sample_packets, MockSource};
use disaster_ingest::stats::{MessageCounts, StatisticsAccumulator};
use disaster_ingest::transformer::DisasterRecord;
use disaster_ingest::validator::validate;
use disaster_ingest::IngestError;
use serde_json::json;
use uuid::Uuid;

fn kerala_record(deaths: i64) -> DisasterRecord {
    let mut raw = sample_packets().remove(0);
    raw["impact"]["deaths"] = json!(deaths);
    DisasterRecord::from(validate(&raw).unwrap())
}

fn batch_options() -> BatchOptions {
    BatchOptions {
        batch_size: 10,
        poll_timeout: Duration::from_millis(10),
        store_invalid_packets: true,
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upsert_is_idempotent_by_packet_id() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let sink = PgSink::new(pg.pool_clone());

    assert_eq!(sink.upsert(&kerala_record(25)).await?, UpsertOutcome::Inserted);
    assert_eq!(sink.upsert(&kerala_record(30)).await?, UpsertOutcome::Updated);

    let (count, deaths): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), MAX(deaths) FROM disaster_events WHERE packet_id = $1",
    )
    .bind("disaster_event_floods_kerala_20240815_001")
    .fetch_one(pg.pool())
    .await?;

    assert_eq!(count, 1, "re-ingest must not create a second row");
    assert_eq!(deaths, 30);

    let raw_deaths: i64 = sqlx::query_scalar(
        "SELECT (raw_packet->'impact'->>'deaths')::BIGINT FROM disaster_events WHERE packet_id = $1",
    )
    .bind("disaster_event_floods_kerala_20240815_001")
    .fetch_one(pg.pool())
    .await?;
    assert_eq!(raw_deaths, 30);

    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_created_at_survives_reingest() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let sink = PgSink::new(pg.pool_clone());

    sink.upsert(&kerala_record(25)).await?;
    let first: chrono::DateTime<chrono::Utc> =
        sqlx::query_scalar("SELECT created_at FROM disaster_events WHERE packet_id = $1")
            .bind("disaster_event_floods_kerala_20240815_001")
            .fetch_one(pg.pool())
            .await?;

    sink.upsert(&kerala_record(30)).await?;
    let events = EventQueries::new(pg.pool_clone()).by_type("floods", None).await?;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].created_at, first);
    assert!(events[0].updated_at >= first);

    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_migrations_can_rerun() -> Result<()> {
    let pg = TestPostgres::start().await?;
    disaster_ingest::db::migrate(pg.pool()).await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_batch_writes_events_statistics_and_rejections() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let sink = Arc::new(PgSink::new(pg.pool_clone()));

    let mut packets = sample_packets();
    packets.push(json!({ "packet_id": "no_dates", "metadata": { "disaster_type": "floods" } }));

    let mut orchestrator =
        BatchOrchestrator::new(Box::new(MockSource::new(packets)), sink, batch_options());
    let report = orchestrator.run_batch().await?;

    assert_eq!(report.state, BatchState::Done);
    assert_eq!(report.fetched, 4);
    assert_eq!(report.stored, 3);
    assert_eq!(report.rejected, 1);

    let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM disaster_events")
        .fetch_one(pg.pool())
        .await?;
    assert_eq!(events, 3);

    let (stored, total_deaths, by_type): (i64, i64, serde_json::Value) = sqlx::query_as(
        "SELECT messages_stored, total_deaths, by_disaster_type \
         FROM consumption_statistics WHERE batch_id = $1",
    )
    .bind(report.batch_id)
    .fetch_one(pg.pool())
    .await?;
    assert_eq!(stored, 3);
    assert_eq!(total_deaths, 37);
    assert_eq!(by_type["cyclones"], 1);

    let (packet_id, reason_kind): (Option<String>, String) = sqlx::query_as(
        "SELECT packet_id, reason_kind FROM invalid_packets WHERE batch_id = $1",
    )
    .bind(report.batch_id)
    .fetch_one(pg.pool())
    .await?;
    assert_eq!(packet_id.as_deref(), Some("no_dates"));
    assert_eq!(reason_kind, "missing_field");

    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_statistics_row_written_once_per_batch() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let sink = PgSink::new(pg.pool_clone());

    let batch_id = Uuid::new_v4();
    let mut acc = StatisticsAccumulator::new(batch_id, chrono::Utc::now());
    acc.record(&kerala_record(25));
    let stats = acc.finish(
        MessageCounts {
            consumed: 1,
            validated: 1,
            stored: 1,
            ..Default::default()
        },
        chrono::Utc::now(),
    );

    assert!(sink.append_statistics(&stats).await?);
    assert!(!sink.append_statistics(&stats).await?);

    let rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM consumption_statistics WHERE batch_id = $1")
            .bind(batch_id)
            .fetch_one(pg.pool())
            .await?;
    assert_eq!(rows, 1);

    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_check_constraint_is_a_record_failure() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let sink = PgSink::new(pg.pool_clone());

    let mut record = kerala_record(25);
    record.deaths = -1;

    let err = sink.upsert(&record).await.unwrap_err();
    assert!(matches!(err, IngestError::Storage { .. }));
    assert!(!err.is_unavailable());

    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_closed_pool_is_unavailable() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let pool = pg.pool_clone();
    let sink = PgSink::new(pool.clone());

    pool.close().await;

    let err = sink.health_check().await.unwrap_err();
    assert!(matches!(err, IngestError::SinkUnavailable(_)));

    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_queries_read_back_stored_events() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let sink = Arc::new(PgSink::new(pg.pool_clone()));

    BatchOrchestrator::new(Box::new(MockSource::sample()), sink, batch_options())
        .run_batch()
        .await?;

    let queries = EventQueries::new(pg.pool_clone());

    let floods = queries.by_type("floods", None).await?;
    assert_eq!(floods.len(), 1);
    assert_eq!(floods[0].deaths, 25);
    assert_eq!(floods[0].affected_locations, vec!["Kerala", "Wayanad", "Idukki"]);

    // primary location, case-insensitive
    assert_eq!(queries.by_location("odisha", None).await?.len(), 1);
    // member of affected locations
    assert_eq!(queries.by_location("NCR", None).await?.len(), 1);
    // wildcards match literally
    assert!(queries.by_location("%", None).await?.is_empty());
    assert!(queries.by_location("_erala", None).await?.is_empty());

    let late_august = queries
        .by_date_range(
            NaiveDate::from_ymd_opt(2024, 8, 18).unwrap(),
            NaiveDate::from_ymd_opt(2024, 8, 31).unwrap(),
            None,
        )
        .await?;
    assert_eq!(late_august.len(), 2);

    assert!(queries
        .by_date_range(
            NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
            None,
        )
        .await
        .is_err());

    assert_eq!(queries.by_type("floods", Some(0)).await?.len(), 1);

    let summary = queries.summary().await?;
    assert_eq!(summary.total_events, 3);
    assert_eq!(summary.total_deaths, 37);
    assert_eq!(summary.by_severity.get("high"), Some(&2));
    assert_eq!(summary.by_severity.get("medium"), Some(&1));
    assert_eq!(summary.earliest_event, NaiveDate::from_ymd_opt(2024, 8, 15));
    assert_eq!(summary.batches_recorded, 1);

    let batches = queries.recent_batches(None).await?;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].messages_stored, 3);

    Ok(())
}
