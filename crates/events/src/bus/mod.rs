//! Message bus abstraction.
//!
//! The consumer loop talks to the bus only through [`BusConnector`] and
//! [`BusConsumer`], so the same delivery logic runs against the in-process
//! [`MemoryBus`] and, with the `kafka` feature, against a Kafka cluster.
//!
//! Offsets are acknowledged one message at a time. Committing message `m`
//! records `m.offset + 1` as the group's next position, matching Kafka's
//! convention.

use async_trait::async_trait;

use crate::error::BusResult;

pub mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use memory::{MemoryBus, MemoryConsumer};

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConnector, KafkaConsumer};

/// A message read from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// One consumer-group member's view of the bus.
///
/// `next_message` must be cancel-safe: dropping its future before it
/// resolves must not lose or skip a message.
#[async_trait]
pub trait BusConsumer: Send {
    /// Join the group's subscription for `topics`.
    async fn subscribe(&mut self, topics: &[String]) -> BusResult<()>;

    /// Wait for the next message, with no timeout.
    async fn next_message(&mut self) -> BusResult<BusMessage>;

    /// Synchronously acknowledge `message` for the group.
    async fn commit(&mut self, message: &BusMessage) -> BusResult<()>;

    /// Make `message` the next one read from its partition.
    async fn rewind(&mut self, message: &BusMessage) -> BusResult<()>;
}

/// Factory for consumers of one bus.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Open a fresh consumer belonging to `group`.
    async fn connect(&self, group: &str) -> BusResult<Box<dyn BusConsumer>>;
}
