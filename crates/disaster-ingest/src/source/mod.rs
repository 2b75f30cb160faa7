//! Message sources
//!
//! A source hands out up to `max` raw packets per call. Offset tracking is the
//! source's own business (the Kafka source relies on its consumer group); the
//! orchestrator keeps no cursor.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::IngestError;
use crate::packet::RawPacket;

pub mod jsonl;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;

pub use jsonl::JsonLinesSource;
#[cfg(feature = "kafka")]
pub use kafka::KafkaSource;
pub use mock::{sample_packets, MockSource};

#[async_trait]
pub trait MessageSource: Send {
    /// Fetch up to `max` packets, waiting at most `timeout` for them
    ///
    /// An empty vector means nothing was available. Errors mean the source
    /// itself could not be reached.
    async fn fetch(&mut self, max: usize, timeout: Duration)
        -> Result<Vec<RawPacket>, IngestError>;

    /// Short label for logs
    fn name(&self) -> &'static str;
}

/// Decode a message payload into a raw packet
///
/// Payloads that are missing, not UTF-8 or not JSON are kept as a JSON string
/// so the validator rejects them with a reason instead of the source dropping
/// them silently.
pub fn decode_packet(payload: Option<&[u8]>) -> RawPacket {
    let Some(bytes) = payload else {
        return Value::Null;
    };

    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, bytes = bytes.len(), "undecodable message payload");
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        },
    }
}
