//! Packet to storage record mapping
//!
//! The transform is total over validated packets, so it is a plain `From`
//! impl rather than a fallible step.

use chrono::NaiveDate;
use serde::Serialize;

use crate::packet::{DisasterPacket, RawPacket, Severity};

/// Records are kept for a year unless the producer asks otherwise
pub const DEFAULT_RETENTION_DAYS: i32 = 365;

/// Flat row shape of the `disaster_events` table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisasterRecord {
    pub packet_id: String,
    pub packet_type: Option<String>,
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
    pub damage_amount: Option<f64>,

    pub severity: Option<Severity>,
    pub source_url: Option<String>,
    pub source_domain: Option<String>,
    pub source_title: Option<String>,
    pub relevance_score: Option<i32>,

    pub priority: Option<String>,
    pub retention_days: i32,

    pub raw_packet: RawPacket,
}

impl From<&DisasterPacket> for DisasterRecord {
    fn from(packet: &DisasterPacket) -> Self {
        let location_count = packet.location_count.unwrap_or_else(|| {
            i32::try_from(packet.affected_locations.len()).unwrap_or(i32::MAX)
        });

        let duration_days = packet.duration_days.or_else(|| {
            packet
                .end_date
                .map(|end| (end - packet.start_date).num_days())
                .and_then(|days| i32::try_from(days).ok())
        });

        Self {
            packet_id: packet.packet_id.clone(),
            packet_type: packet.packet_type.clone(),
            disaster_type: packet.disaster_type.clone(),
            event_name: packet.event_name.clone(),
            start_date: packet.start_date,
            end_date: packet.end_date,
            duration_days,
            primary_location: packet.primary_location.clone(),
            affected_locations: packet.affected_locations.clone(),
            location_count,
            deaths: packet.impact.deaths,
            injured: packet.impact.injured,
            displaced: packet.impact.displaced,
            affected: packet.impact.affected,
            damage_amount: packet.impact.damage_amount,
            severity: packet.severity,
            source_url: packet.source.url.clone(),
            source_domain: packet.source.domain.clone(),
            source_title: packet.source.title.clone(),
            relevance_score: packet.relevance_score,
            priority: packet.priority.clone(),
            retention_days: packet.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
            raw_packet: packet.raw.clone(),
        }
    }
}

impl From<DisasterPacket> for DisasterRecord {
    fn from(packet: DisasterPacket) -> Self {
        Self::from(&packet)
    }
}

/// Map a batch of validated packets, preserving order
pub fn transform_all(packets: &[DisasterPacket]) -> Vec<DisasterRecord> {
    packets.iter().map(DisasterRecord::from).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::validator::validate;
    use serde_json::json;

    fn packet(value: serde_json::Value) -> DisasterPacket {
        validate(&value).unwrap()
    }

    #[test]
    fn test_fields_carried_over() {
        let raw = json!({
            "packet_id": "cyclone_dana_odisha_20241024",
            "temporal": { "start_date": "2024-10-24", "end_date": "2024-10-26", "duration_days": 2 },
            "spatial": { "primary_location": "Odisha", "affected_locations": ["Odisha", "West Bengal"], "location_count": 2 },
            "impact": { "deaths": 4, "injured": 19, "displaced": 600000, "affected": 1000000 },
            "metadata": {
                "disaster_type": "cyclones",
                "event_name": "Cyclone Dana",
                "severity": "critical",
                "source": { "url": "https://example.org/dana", "domain": "example.org" }
            },
            "processing_instructions": { "priority": "high", "retention_days": 730 }
        });

        let record = DisasterRecord::from(&packet(raw.clone()));

        assert_eq!(record.packet_id, "cyclone_dana_odisha_20241024");
        assert_eq!(record.disaster_type, "cyclones");
        assert_eq!(record.event_name.as_deref(), Some("Cyclone Dana"));
        assert_eq!(record.duration_days, Some(2));
        assert_eq!(record.location_count, 2);
        assert_eq!(record.displaced, 600000);
        assert_eq!(record.severity, Some(Severity::Critical));
        assert_eq!(record.source_domain.as_deref(), Some("example.org"));
        assert_eq!(record.retention_days, 730);
        assert_eq!(record.raw_packet, raw);
    }

    #[test]
    fn test_derived_defaults() {
        let record = DisasterRecord::from(packet(json!({
            "packet_id": "p1",
            "temporal": { "start_date": "2024-08-15", "end_date": "2024-08-20" },
            "spatial": { "affected_locations": ["A", "B", "C"] },
            "metadata": { "disaster_type": "floods" }
        })));

        assert_eq!(record.location_count, 3);
        assert_eq!(record.duration_days, Some(5));
        assert_eq!(record.retention_days, DEFAULT_RETENTION_DAYS);
        assert_eq!(record.deaths, 0);
        assert_eq!(record.severity, None);
    }

    #[test]
    fn test_no_end_date_no_duration() {
        let record = DisasterRecord::from(packet(json!({
            "packet_id": "p2",
            "temporal": { "start_date": "2024-08-15" },
            "metadata": { "disaster_type": "earthquakes" }
        })));

        assert_eq!(record.duration_days, None);
        assert_eq!(record.location_count, 0);
        assert!(record.affected_locations.is_empty());
    }
}
