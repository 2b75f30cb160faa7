//! Disaster event packet types
//!
//! A [`RawPacket`] is whatever JSON the producer published. The validator turns
//! it into a [`DisasterPacket`], whose fields are typed and checked, while the
//! original JSON rides along untouched for the audit column.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Untyped packet as it arrives from the message source
pub type RawPacket = Value;

/// Disaster impact classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(s.to_string()),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Impact counters; all non-negative once validated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Impact {
    pub deaths: i64,
    pub injured: i64,
    pub displaced: i64,
    pub affected: i64,
    pub damage_amount: Option<f64>,
}

/// Where the producer found the event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub url: Option<String>,
    pub domain: Option<String>,
    pub title: Option<String>,
}

/// A packet that passed validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisasterPacket {
    pub packet_id: String,
    pub packet_type: Option<String>,
    pub disaster_type: String,

    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub duration_days: Option<i32>,

    pub primary_location: Option<String>,
    pub affected_locations: Vec<String>,
    pub location_count: Option<i32>,

    pub impact: Impact,
    pub severity: Option<Severity>,
    pub event_name: Option<String>,
    pub source: SourceRef,
    pub relevance_score: Option<i32>,

    pub priority: Option<String>,
    pub retention_days: Option<i32>,

    /// The packet exactly as received
    pub raw: RawPacket,
}
