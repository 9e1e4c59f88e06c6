//! Kafka transport built on librdkafka.
//!
//! Auto-commit is disabled; offsets are stored only through
//! [`BusConsumer::commit`], synchronously and one message at a time.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Message, Offset, TopicPartitionList};
use tracing::debug;

use super::{BusConnector, BusConsumer, BusMessage};
use crate::error::{BusError, BusResult};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Creates group members against a Kafka cluster.
#[derive(Debug, Clone)]
pub struct KafkaConnector {
    brokers: String,
    overrides: Vec<(String, String)>,
}

impl KafkaConnector {
    /// Connector for a comma-separated broker list.
    #[must_use]
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            overrides: Vec::new(),
        }
    }

    /// Set an additional librdkafka property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl BusConnector for KafkaConnector {
    async fn connect(&self, group: &str) -> BusResult<Box<dyn BusConsumer>> {
        let mut config = ClientConfig::new();
        config
            .set("group.id", group)
            .set("bootstrap.servers", &self.brokers)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest");
        for (key, value) in &self.overrides {
            config.set(key, value);
        }

        let consumer: StreamConsumer = config
            .create()
            .map_err(|e| BusError::Transport(e.to_string()))?;

        debug!(brokers = %self.brokers, group, "created kafka consumer");
        Ok(Box::new(KafkaConsumer { consumer }))
    }
}

/// A Kafka consumer-group member.
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

#[async_trait]
impl BusConsumer for KafkaConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> BusResult<()> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&topics)
            .map_err(|e| BusError::Transport(e.to_string()))
    }

    async fn next_message(&mut self) -> BusResult<BusMessage> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;

        Ok(BusMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    async fn commit(&mut self, message: &BusMessage) -> BusResult<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset.saturating_add(1)),
            )
            .map_err(|e| BusError::Commit(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Sync)
            .map_err(|e| BusError::Commit(e.to_string()))
    }

    async fn rewind(&mut self, message: &BusMessage) -> BusResult<()> {
        self.consumer
            .seek(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset),
                SEEK_TIMEOUT,
            )
            .map_err(|e| BusError::Transport(e.to_string()))
    }
}
