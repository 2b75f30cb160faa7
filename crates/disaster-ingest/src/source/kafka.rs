//! Kafka message source
//!
//! Offsets are committed by the consumer group (`enable.auto.commit`), so a
//! restarted consumer resumes where the group left off.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{decode_packet, MessageSource};
use crate::config::KafkaConfig;
use crate::error::IngestError;
use crate::packet::RawPacket;

pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaSource {
    /// Create the consumer and subscribe to the configured topic
    pub fn connect(config: &KafkaConfig) -> Result<Self, IngestError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("enable.auto.commit", "true")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| IngestError::SourceUnavailable(e.to_string()))?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| IngestError::SourceUnavailable(e.to_string()))?;

        info!(
            topic = %config.topic,
            group = %config.consumer_group,
            servers = %config.bootstrap_servers,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn fetch(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> Result<Vec<RawPacket>, IngestError> {
        let deadline = Instant::now() + timeout;
        let mut packets = Vec::new();

        while packets.len() < max {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, self.consumer.recv()).await {
                Err(_) => break,
                Ok(Ok(message)) => {
                    debug!(
                        topic = %self.topic,
                        partition = message.partition(),
                        offset = message.offset(),
                        "received message"
                    );
                    packets.push(decode_packet(message.payload()));
                },
                // Keep what was already received; the error resurfaces next poll
                Ok(Err(e)) if !packets.is_empty() => {
                    warn!(topic = %self.topic, error = %e, "Kafka error after partial fetch");
                    break;
                },
                Ok(Err(e)) => return Err(IngestError::SourceUnavailable(e.to_string())),
            }
        }

        Ok(packets)
    }

    fn name(&self) -> &'static str {
        "kafka"
    }
}
