//! Packet validation
//!
//! [`validate`] is a pure function: it either returns a typed
//! [`DisasterPacket`] (carrying the raw JSON unchanged) or the first
//! [`ValidationError`] found. Checks run in a fixed order so a packet with
//! several problems is always rejected for the same reason:
//!
//! 1. the packet is a JSON object
//! 2. `packet_id` is a non-empty string
//! 3. the disaster type (`metadata.disaster_type`, or top-level) is a non-empty string
//! 4. `temporal.start_date` is present and parseable, `temporal.end_date` parseable if present
//! 5. impact counters are non-negative integers when present
//! 6. severity, when present, is one of low/medium/high/critical
//! 7. `spatial.affected_locations`, when present, is an array of strings

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::packet::{DisasterPacket, Impact, RawPacket, Severity, SourceRef};

/// Why a packet was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("packet is not a JSON object")]
    NotAnObject,

    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },

    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field `{field}` has malformed date {value}")]
    MalformedDate { field: &'static str, value: String },

    #[error("impact counter `{field}` is negative ({value})")]
    NegativeCounter { field: &'static str, value: String },

    #[error("invalid severity {value}; expected one of low, medium, high, critical")]
    InvalidSeverity { value: String },
}

impl ValidationError {
    /// Stable machine-readable name, matching the serialized `kind` tag
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::NotAnObject => "not_an_object",
            ValidationError::MissingField { .. } => "missing_field",
            ValidationError::WrongType { .. } => "wrong_type",
            ValidationError::MalformedDate { .. } => "malformed_date",
            ValidationError::NegativeCounter { .. } => "negative_counter",
            ValidationError::InvalidSeverity { .. } => "invalid_severity",
        }
    }
}

/// A packet that failed validation, kept for reporting and the invalid-packet store
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub packet_id: Option<String>,
    pub reason: ValidationError,
    #[serde(skip_serializing)]
    pub raw: RawPacket,
}

/// Result of validating a whole batch
#[derive(Debug, Default)]
pub struct Partitioned {
    pub accepted: Vec<DisasterPacket>,
    pub rejected: Vec<Rejection>,
}

const COUNTERS: [(&str, &str); 4] = [
    ("deaths", "impact.deaths"),
    ("injured", "impact.injured"),
    ("displaced", "impact.displaced"),
    ("affected", "impact.affected"),
];

/// Split a batch into accepted and rejected packets, preserving input order
pub fn partition(raw_packets: Vec<RawPacket>) -> Partitioned {
    let mut out = Partitioned::default();

    for raw in raw_packets {
        match validate(&raw) {
            Ok(packet) => out.accepted.push(packet),
            Err(reason) => {
                let packet_id = raw
                    .get("packet_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                tracing::debug!(packet_id = ?packet_id, %reason, "packet rejected");
                out.rejected.push(Rejection {
                    packet_id,
                    reason,
                    raw,
                });
            },
        }
    }

    out
}

/// Validate one raw packet
pub fn validate(raw: &RawPacket) -> Result<DisasterPacket, ValidationError> {
    let packet = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let temporal = section(packet, "temporal")?;
    let spatial = section(packet, "spatial")?;
    let impact = section(packet, "impact")?;
    let metadata = section(packet, "metadata")?;
    let processing = section(packet, "processing_instructions")?;

    let packet_id = required_str(packet.get("packet_id"), "packet_id")?;

    let disaster_type = required_str(
        metadata
            .and_then(|m| m.get("disaster_type"))
            .or_else(|| packet.get("disaster_type")),
        "metadata.disaster_type",
    )?;

    let start_date = match temporal.and_then(|t| t.get("start_date")) {
        None | Some(Value::Null) => {
            return Err(ValidationError::MissingField {
                field: "temporal.start_date",
            })
        },
        Some(value) => parse_date(value, "temporal.start_date")?,
    };

    let end_date = match temporal.and_then(|t| t.get("end_date")) {
        None | Some(Value::Null) => None,
        Some(value) => Some(parse_date(value, "temporal.end_date")?),
    };

    let mut counters = [0i64; 4];
    for (slot, (key, field)) in counters.iter_mut().zip(COUNTERS) {
        *slot = counter(impact.and_then(|m| m.get(key)), field)?;
    }
    let [deaths, injured, displaced, affected] = counters;

    let severity = match metadata
        .and_then(|m| m.get("severity"))
        .or_else(|| packet.get("severity"))
    {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.parse::<Severity>().map_err(|_| {
            ValidationError::InvalidSeverity {
                value: format!("{s:?}"),
            }
        })?),
        Some(other) => {
            return Err(ValidationError::InvalidSeverity {
                value: other.to_string(),
            })
        },
    };

    let affected_locations = match spatial.and_then(|s| s.get("affected_locations")) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or(ValidationError::WrongType {
                        field: "spatial.affected_locations",
                        expected: "an array of strings",
                    })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ValidationError::WrongType {
                field: "spatial.affected_locations",
                expected: "an array of strings",
            })
        },
    };

    let source = metadata
        .and_then(|m| m.get("source"))
        .and_then(Value::as_object);

    Ok(DisasterPacket {
        packet_id,
        packet_type: opt_str(packet.get("packet_type")),
        disaster_type,
        start_date,
        end_date,
        duration_days: opt_i32(temporal.and_then(|t| t.get("duration_days"))),
        primary_location: opt_str(spatial.and_then(|s| s.get("primary_location"))),
        affected_locations,
        location_count: opt_i32(spatial.and_then(|s| s.get("location_count"))),
        impact: Impact {
            deaths,
            injured,
            displaced,
            affected,
            damage_amount: impact
                .and_then(|m| m.get("damage_amount"))
                .and_then(Value::as_f64),
        },
        severity,
        event_name: opt_str(metadata.and_then(|m| m.get("event_name"))),
        source: SourceRef {
            url: opt_str(source.and_then(|s| s.get("url"))),
            domain: opt_str(source.and_then(|s| s.get("domain"))),
            title: opt_str(source.and_then(|s| s.get("title"))),
        },
        relevance_score: opt_i32(metadata.and_then(|m| m.get("relevance_score"))),
        priority: opt_str(processing.and_then(|p| p.get("priority"))),
        retention_days: opt_i32(processing.and_then(|p| p.get("retention_days"))),
        raw: raw.clone(),
    })
}

fn section<'a>(
    packet: &'a Map<String, Value>,
    name: &'static str,
) -> Result<Option<&'a Map<String, Value>>, ValidationError> {
    match packet.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(ValidationError::WrongType {
            field: name,
            expected: "an object",
        }),
    }
}

fn required_str(value: Option<&Value>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::MissingField { field }),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(ValidationError::MissingField { field })
        },
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::WrongType {
            field,
            expected: "a string",
        }),
    }
}

fn parse_date(value: &Value, field: &'static str) -> Result<NaiveDate, ValidationError> {
    let malformed = || ValidationError::MalformedDate {
        field,
        value: value.to_string(),
    };

    let text = value.as_str().map(str::trim).ok_or_else(malformed)?;

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.date_naive())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .ok_or_else(malformed)
}

fn counter(value: Option<&Value>, field: &'static str) -> Result<i64, ValidationError> {
    let number = match value {
        None | Some(Value::Null) => return Ok(0),
        Some(Value::Number(n)) => n,
        Some(_) => {
            return Err(ValidationError::WrongType {
                field,
                expected: "a non-negative integer",
            })
        },
    };

    if let Some(v) = number.as_i64() {
        return if v < 0 {
            Err(ValidationError::NegativeCounter {
                field,
                value: v.to_string(),
            })
        } else {
            Ok(v)
        };
    }

    match number.as_f64() {
        Some(f) if f < 0.0 => Err(ValidationError::NegativeCounter {
            field,
            value: number.to_string(),
        }),
        _ => Err(ValidationError::WrongType {
            field,
            expected: "a non-negative integer",
        }),
    }
}

fn opt_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn opt_i32(value: Option<&Value>) -> Option<i32> {
    value
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
}
