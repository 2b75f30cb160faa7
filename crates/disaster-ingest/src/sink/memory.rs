//! In-process sink used for dry runs and tests

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{StorageSink, UpsertOutcome};
use crate::error::IngestError;
use crate::stats::BatchStatistics;
use crate::transformer::DisasterRecord;
use crate::validator::Rejection;

#[derive(Debug, Default)]
struct MemoryState {
    events: BTreeMap<String, DisasterRecord>,
    statistics: Vec<BatchStatistics>,
    rejections: Vec<(Uuid, Rejection)>,
}

/// Keeps everything in memory with the same upsert and append-once rules as
/// the Postgres sink
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<DisasterRecord> {
        self.state.lock().await.events.values().cloned().collect()
    }

    pub async fn event(&self, packet_id: &str) -> Option<DisasterRecord> {
        self.state.lock().await.events.get(packet_id).cloned()
    }

    pub async fn statistics(&self) -> Vec<BatchStatistics> {
        self.state.lock().await.statistics.clone()
    }

    pub async fn rejections(&self) -> Vec<(Uuid, Rejection)> {
        self.state.lock().await.rejections.clone()
    }
}

#[async_trait]
impl StorageSink for MemorySink {
    async fn health_check(&self) -> Result<(), IngestError> {
        Ok(())
    }

    async fn upsert(&self, record: &DisasterRecord) -> Result<UpsertOutcome, IngestError> {
        let previous = self
            .state
            .lock()
            .await
            .events
            .insert(record.packet_id.clone(), record.clone());

        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    async fn append_statistics(&self, stats: &BatchStatistics) -> Result<bool, IngestError> {
        let mut state = self.state.lock().await;
        if state.statistics.iter().any(|s| s.batch_id == stats.batch_id) {
            return Ok(false);
        }
        state.statistics.push(stats.clone());
        Ok(true)
    }

    async fn record_rejection(
        &self,
        batch_id: Uuid,
        rejection: &Rejection,
    ) -> Result<(), IngestError> {
        self.state
            .lock()
            .await
            .rejections
            .push((batch_id, rejection.clone()));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::stats::{MessageCounts, StatisticsAccumulator};
    use crate::validator::validate;
    use chrono::Utc;
    use serde_json::json;

    fn record(deaths: i64) -> DisasterRecord {
        DisasterRecord::from(
            validate(&json!({
                "packet_id": "kerala_floods",
                "temporal": { "start_date": "2024-08-15" },
                "impact": { "deaths": deaths },
                "metadata": { "disaster_type": "floods" }
            }))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let sink = MemorySink::new();

        assert_eq!(sink.upsert(&record(25)).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(sink.upsert(&record(30)).await.unwrap(), UpsertOutcome::Updated);

        let events = sink.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].deaths, 30);
    }

    #[tokio::test]
    async fn test_statistics_append_once() {
        let sink = MemorySink::new();
        let stats = StatisticsAccumulator::new(Uuid::new_v4(), Utc::now())
            .finish(MessageCounts::default(), Utc::now());

        assert!(sink.append_statistics(&stats).await.unwrap());
        assert!(!sink.append_statistics(&stats).await.unwrap());
        assert_eq!(sink.statistics().await.len(), 1);
    }
}
