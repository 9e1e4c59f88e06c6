//! In-process message bus.
//!
//! Each topic is a single partition (partition `0`) holding every produced
//! message. Committed offsets are tracked per `(group, topic)` and survive
//! consumers, so a reconnecting consumer resumes at the first unacknowledged
//! message the same way a Kafka group member does after a restart.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use super::{BusConnector, BusConsumer, BusMessage};
use crate::error::{BusError, BusResult};

#[derive(Debug, Clone)]
struct StoredMessage {
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct BusState {
    topics: HashMap<String, Vec<StoredMessage>>,
    committed: HashMap<(String, String), i64>,
    commit_failures: usize,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BusState>,
    changed: Notify,
}

/// Cloneable handle to an in-process bus.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    shared: Arc<Shared>,
}

impl MemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message to `topic` and return its offset.
    pub fn produce(&self, topic: &str, key: Option<&[u8]>, payload: impl Into<Vec<u8>>) -> i64 {
        let offset = {
            let mut state = self.lock();
            let log = state.topics.entry(topic.to_string()).or_default();
            log.push(StoredMessage {
                key: key.map(<[u8]>::to_vec),
                payload: payload.into(),
            });
            i64::try_from(log.len()).map_or(i64::MAX, |len| len.saturating_sub(1))
        };

        debug!(topic, offset, "produced message");
        self.shared.changed.notify_waiters();
        offset
    }

    /// Next offset `group` will read from `topic`, if it ever committed.
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str) -> Option<i64> {
        self.lock()
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }

    /// Number of messages ever produced to `topic`.
    #[must_use]
    pub fn topic_len(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map_or(0, Vec::len)
    }

    /// Make the next `count` commits fail with a transport error.
    pub fn fail_next_commits(&self, count: usize) {
        self.lock().commit_failures = count;
    }

    /// Tear the bus down; every pending and future read returns
    /// [`BusError::Closed`].
    pub fn close(&self) {
        self.lock().closed = true;
        self.shared.changed.notify_waiters();
    }
}

#[async_trait]
impl BusConnector for MemoryBus {
    async fn connect(&self, group: &str) -> BusResult<Box<dyn BusConsumer>> {
        if self.lock().closed {
            return Err(BusError::Closed);
        }

        Ok(Box::new(MemoryConsumer {
            bus: self.clone(),
            group: group.to_string(),
            positions: Vec::new(),
        }))
    }
}

/// A group member reading from a [`MemoryBus`].
#[derive(Debug)]
pub struct MemoryConsumer {
    bus: MemoryBus,
    group: String,
    /// Subscribed topics with the next offset to read.
    positions: Vec<(String, i64)>,
}

impl MemoryConsumer {
    /// Take the next available message without waiting.
    fn poll(&mut self) -> BusResult<Option<BusMessage>> {
        let state = self.bus.lock();
        if state.closed {
            return Err(BusError::Closed);
        }

        for (topic, position) in &mut self.positions {
            let Some(log) = state.topics.get(topic.as_str()) else {
                continue;
            };
            let Some(stored) = usize::try_from(*position).ok().and_then(|i| log.get(i)) else {
                continue;
            };

            let message = BusMessage {
                topic: topic.clone(),
                partition: 0,
                offset: *position,
                key: stored.key.clone(),
                payload: stored.payload.clone(),
            };
            *position = position.saturating_add(1);
            return Ok(Some(message));
        }

        Ok(None)
    }
}

#[async_trait]
impl BusConsumer for MemoryConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> BusResult<()> {
        let state = self.bus.lock();
        if state.closed {
            return Err(BusError::Closed);
        }

        self.positions = topics
            .iter()
            .map(|topic| {
                let start = state
                    .committed
                    .get(&(self.group.clone(), topic.clone()))
                    .copied()
                    .unwrap_or(0);
                (topic.clone(), start)
            })
            .collect();
        Ok(())
    }

    async fn next_message(&mut self) -> BusResult<BusMessage> {
        let shared = Arc::clone(&self.bus.shared);
        loop {
            // Register interest before polling so a produce between the poll
            // and the await is not missed.
            let mut changed = pin!(shared.changed.notified());
            changed.as_mut().enable();

            if let Some(message) = self.poll()? {
                return Ok(message);
            }

            changed.await;
        }
    }

    async fn commit(&mut self, message: &BusMessage) -> BusResult<()> {
        let mut state = self.bus.lock();
        if state.commit_failures > 0 {
            state.commit_failures = state.commit_failures.saturating_sub(1);
            return Err(BusError::Commit(format!(
                "injected failure at {}@{}",
                message.topic, message.offset
            )));
        }

        state.committed.insert(
            (self.group.clone(), message.topic.clone()),
            message.offset.saturating_add(1),
        );
        Ok(())
    }

    async fn rewind(&mut self, message: &BusMessage) -> BusResult<()> {
        if let Some((_, position)) = self
            .positions
            .iter_mut()
            .find(|(topic, _)| *topic == message.topic)
        {
            *position = message.offset;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn consumer(bus: &MemoryBus, group: &str, topic: &str) -> Box<dyn BusConsumer> {
        let mut consumer = bus.connect(group).await.unwrap();
        consumer.subscribe(&[topic.to_string()]).await.unwrap();
        consumer
    }

    #[tokio::test]
    async fn test_reads_in_offset_order() {
        let bus = MemoryBus::new();
        bus.produce("ProjectStatus", None, b"a".to_vec());
        bus.produce("ProjectStatus", Some(b"k"), b"b".to_vec());

        let mut consumer = consumer(&bus, "g", "ProjectStatus").await;
        let first = consumer.next_message().await.unwrap();
        let second = consumer.next_message().await.unwrap();

        assert_eq!((first.offset, first.payload), (0, b"a".to_vec()));
        assert_eq!((second.offset, second.key), (1, Some(b"k".to_vec())));
    }

    #[tokio::test]
    async fn test_waits_for_future_messages() {
        let bus = MemoryBus::new();
        let mut consumer = consumer(&bus, "g", "NewZip").await;

        let producer = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.produce("NewZip", None, b"late".to_vec());
        });

        let message = tokio::time::timeout(Duration::from_secs(2), consumer.next_message())
            .await
            .expect("message should arrive")
            .unwrap();
        assert_eq!(message.payload, b"late".to_vec());
    }

    #[tokio::test]
    async fn test_reconnect_resumes_after_last_commit() {
        let bus = MemoryBus::new();
        for payload in ["a", "b", "c"] {
            bus.produce("ProjectStatus", None, payload.as_bytes().to_vec());
        }

        let mut first = consumer(&bus, "g", "ProjectStatus").await;
        let a = first.next_message().await.unwrap();
        first.commit(&a).await.unwrap();
        let _uncommitted = first.next_message().await.unwrap();
        drop(first);

        let mut second = consumer(&bus, "g", "ProjectStatus").await;
        let redelivered = second.next_message().await.unwrap();

        assert_eq!(redelivered.payload, b"b".to_vec());
        assert_eq!(bus.committed_offset("g", "ProjectStatus"), Some(1));
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let bus = MemoryBus::new();
        bus.produce("ProjectStatus", None, b"a".to_vec());

        let mut g1 = consumer(&bus, "g1", "ProjectStatus").await;
        let message = g1.next_message().await.unwrap();
        g1.commit(&message).await.unwrap();

        assert_eq!(bus.committed_offset("g1", "ProjectStatus"), Some(1));
        assert_eq!(bus.committed_offset("g2", "ProjectStatus"), None);
    }

    #[tokio::test]
    async fn test_rewind_redelivers_message() {
        let bus = MemoryBus::new();
        bus.produce("ProjectStatus", None, b"a".to_vec());
        bus.produce("ProjectStatus", None, b"b".to_vec());

        let mut consumer = consumer(&bus, "g", "ProjectStatus").await;
        let a = consumer.next_message().await.unwrap();
        consumer.rewind(&a).await.unwrap();

        assert_eq!(consumer.next_message().await.unwrap(), a);
    }

    #[tokio::test]
    async fn test_injected_commit_failure() {
        let bus = MemoryBus::new();
        bus.produce("ProjectStatus", None, b"a".to_vec());
        bus.fail_next_commits(1);

        let mut consumer = consumer(&bus, "g", "ProjectStatus").await;
        let a = consumer.next_message().await.unwrap();

        assert!(matches!(consumer.commit(&a).await, Err(BusError::Commit(_))));
        assert!(consumer.commit(&a).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_wakes_pending_reader() {
        let bus = MemoryBus::new();
        let mut consumer = consumer(&bus, "g", "ProjectStatus").await;

        let closer = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });

        let result = tokio::time::timeout(Duration::from_secs(2), consumer.next_message())
            .await
            .expect("close should wake the reader");
        assert_eq!(result, Err(BusError::Closed));
    }
}
