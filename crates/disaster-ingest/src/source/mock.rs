//! Built-in packets for running without a broker

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::MessageSource;
use crate::error::IngestError;
use crate::packet::RawPacket;

/// Hands out a fixed queue of packets, then nothing
#[derive(Debug, Default)]
pub struct MockSource {
    queue: VecDeque<RawPacket>,
}

impl MockSource {
    pub fn new(packets: impl IntoIterator<Item = RawPacket>) -> Self {
        Self {
            queue: packets.into_iter().collect(),
        }
    }

    /// Source preloaded with [`sample_packets`]
    pub fn sample() -> Self {
        Self::new(sample_packets())
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

#[async_trait]
impl MessageSource for MockSource {
    async fn fetch(
        &mut self,
        max: usize,
        _timeout: Duration,
    ) -> Result<Vec<RawPacket>, IngestError> {
        let take = max.min(self.queue.len());
        Ok(self.queue.drain(..take).collect())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Three well-formed packets covering floods, cyclones and earthquakes
pub fn sample_packets() -> Vec<RawPacket> {
    vec![
        json!({
            "packet_id": "disaster_event_floods_kerala_20240815_001",
            "packet_type": "discrete_disaster_event",
            "kafka_topic": "disaster-data-ingestion",
            "timestamp": "2024-08-15T10:30:00",
            "temporal": {
                "start_date": "2024-08-15",
                "end_date": "2024-08-17",
                "duration_days": 2,
                "temporal_description": "August 15-17, 2024"
            },
            "spatial": {
                "primary_location": "Kerala",
                "affected_locations": ["Kerala", "Wayanad", "Idukki"],
                "location_count": 3
            },
            "impact": { "deaths": 25, "injured": 50, "displaced": 1000, "affected": 5000 },
            "metadata": {
                "disaster_type": "floods",
                "severity": "high",
                "event_name": "Kerala Monsoon Floods 2024",
                "source": {
                    "url": "https://www.thehindu.com/news/kerala-floods-2024",
                    "domain": "thehindu.com",
                    "title": "Heavy Floods Hit Kerala: 25 Dead"
                },
                "relevance_score": 9
            },
            "processing_instructions": { "priority": "high", "retention_days": 365 }
        }),
        json!({
            "packet_id": "disaster_event_cyclone_odisha_20240820_001",
            "packet_type": "discrete_disaster_event",
            "kafka_topic": "disaster-data-ingestion",
            "timestamp": "2024-08-20T14:00:00",
            "temporal": { "start_date": "2024-08-20", "end_date": "2024-08-22", "duration_days": 2 },
            "spatial": {
                "primary_location": "Odisha",
                "affected_locations": ["Odisha", "Puri", "Bhubaneswar"],
                "location_count": 3
            },
            "impact": { "deaths": 12, "injured": 35, "displaced": 2000, "affected": 10000 },
            "metadata": {
                "disaster_type": "cyclones",
                "severity": "high",
                "event_name": "Cyclone Dana",
                "source": {
                    "url": "https://www.ndtv.com/cyclone-dana-odisha",
                    "domain": "ndtv.com",
                    "title": "Cyclone Dana Makes Landfall in Odisha"
                },
                "relevance_score": 8
            },
            "processing_instructions": { "priority": "critical", "retention_days": 365 }
        }),
        json!({
            "packet_id": "disaster_event_earthquake_delhi_20240825_001",
            "packet_type": "discrete_disaster_event",
            "kafka_topic": "disaster-data-ingestion",
            "timestamp": "2024-08-25T08:15:00",
            "temporal": { "start_date": "2024-08-25", "end_date": "2024-08-25", "duration_days": 0 },
            "spatial": {
                "primary_location": "Delhi",
                "affected_locations": ["Delhi", "NCR", "Gurgaon"],
                "location_count": 3
            },
            "impact": { "deaths": 0, "injured": 5, "displaced": 0, "affected": 500 },
            "metadata": {
                "disaster_type": "earthquakes",
                "severity": "medium",
                "event_name": "Delhi Tremors",
                "source": {
                    "url": "https://www.hindustantimes.com/delhi-earthquake",
                    "domain": "hindustantimes.com",
                    "title": "Earthquake Tremors Felt in Delhi-NCR"
                },
                "relevance_score": 6
            },
            "processing_instructions": { "priority": "normal", "retention_days": 365 }
        }),
    ]
}
