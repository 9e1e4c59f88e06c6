//! Per-topic consumer loop and delivery coordination.
//!
//! One [`TopicConsumer`] owns one topic. For each message it resolves the
//! codec, decodes, applies the command to the repository, publishes the
//! result, and only then commits the offset. The commit boundary:
//!
//! | Outcome                       | Commit | Next                         |
//! |-------------------------------|--------|------------------------------|
//! | applied                       | yes    | next message                 |
//! | poison (decode error)         | yes    | next message                 |
//! | project not found             | yes    | next message                 |
//! | any other storage error       | no     | rewind, back off, re-read    |
//! | schema resolution error       | no     | session ends, supervisor     |

use std::sync::Arc;
use std::time::Duration;

use projectd_core::Project;
use projectd_store::{ProjectRepository, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::broadcast::UpdateBroadcaster;
use crate::bus::{BusConnector, BusConsumer, BusMessage};
use crate::decode::{EventKind, decode};
use crate::error::{DecodeError, PipelineError, SchemaError};
use crate::schema::SchemaResolver;
use crate::shutdown::ShutdownListener;

/// Consumer group used when none is configured.
pub const DEFAULT_GROUP_ID: &str = "project-psg";

/// A topic and the event type carried on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicBinding {
    pub topic: String,
    pub kind: EventKind,
}

impl TopicBinding {
    pub fn new(topic: impl Into<String>, kind: EventKind) -> Self {
        Self {
            topic: topic.into(),
            kind,
        }
    }

    /// Bindings using each event kind's name as its topic.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        EventKind::ALL
            .into_iter()
            .map(|kind| Self::new(kind.as_str(), kind))
            .collect()
    }
}

/// Delivery tuning shared by every topic consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub group_id: String,
    /// Pause before re-reading a message whose apply failed transiently.
    pub retry_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            group_id: DEFAULT_GROUP_ID.to_string(),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Collaborators a consumer needs, shared across topics.
#[derive(Clone)]
pub struct ConsumerContext {
    pub resolver: Arc<SchemaResolver>,
    pub repository: Arc<dyn ProjectRepository>,
    pub broadcaster: UpdateBroadcaster,
    pub connector: Arc<dyn BusConnector>,
    pub settings: ConsumerSettings,
}

/// Why a message was acknowledged without being applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Poison(DecodeError),
    NotFound(StoreError),
}

/// The outcome of processing one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Applied and published; commit.
    Applied(Project),
    /// Intentionally skipped; commit.
    Skipped(SkipReason),
    /// Not applied; do not commit.
    Retry(StoreError),
}

impl Disposition {
    /// Whether the message's offset may be committed.
    #[must_use]
    pub const fn should_commit(&self) -> bool {
        !matches!(self, Self::Retry(_))
    }
}

/// Consumer for a single topic binding.
#[derive(Clone)]
pub struct TopicConsumer {
    binding: TopicBinding,
    context: ConsumerContext,
}

impl TopicConsumer {
    #[must_use]
    pub fn new(binding: TopicBinding, context: ConsumerContext) -> Self {
        Self { binding, context }
    }

    #[must_use]
    pub fn binding(&self) -> &TopicBinding {
        &self.binding
    }

    /// Decode and apply one message.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if the topic's codec cannot be resolved.
    /// Every other failure is reported through the [`Disposition`].
    pub async fn process(&self, message: &BusMessage) -> Result<Disposition, SchemaError> {
        let codec = self.context.resolver.resolve(&message.topic).await?;

        let command = match decode(self.binding.kind, &message.payload, &codec) {
            Ok(command) => command,
            Err(err) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "skipping poison message"
                );
                return Ok(Disposition::Skipped(SkipReason::Poison(err)));
            }
        };

        match self.context.repository.apply(&command).await {
            Ok(project) => {
                let watchers = self.context.broadcaster.publish(&project);
                debug!(
                    topic = %message.topic,
                    offset = message.offset,
                    project = %command.id(),
                    command = command.kind(),
                    watchers,
                    "applied update"
                );
                Ok(Disposition::Applied(project))
            }
            Err(err) if err.is_not_found() => {
                warn!(
                    topic = %message.topic,
                    offset = message.offset,
                    project = %command.id(),
                    command = command.kind(),
                    "update references unknown project, skipping"
                );
                Ok(Disposition::Skipped(SkipReason::NotFound(err)))
            }
            Err(err) => {
                error!(
                    topic = %message.topic,
                    offset = message.offset,
                    project = %command.id(),
                    error = %err,
                    retryable = err.is_retryable(),
                    "failed to apply update, will retry"
                );
                Ok(Disposition::Retry(err))
            }
        }
    }

    /// Run one consumption session until shutdown or failure.
    ///
    /// Once a message has been read it is processed to completion even if
    /// shutdown fires meanwhile.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] if the bus fails or a schema cannot be
    /// resolved; the supervisor restarts the session.
    pub async fn run_session(&self, mut shutdown: ShutdownListener) -> Result<(), PipelineError> {
        let topic = self.binding.topic.as_str();
        let mut consumer = self
            .context
            .connector
            .connect(&self.context.settings.group_id)
            .await?;
        consumer
            .subscribe(std::slice::from_ref(&self.binding.topic))
            .await?;

        info!(topic, kind = %self.binding.kind, group = %self.context.settings.group_id, "consumer session started");

        loop {
            let message = tokio::select! {
                biased;
                () = shutdown.wait() => {
                    info!(topic, "consumer session stopping");
                    return Ok(());
                }
                next = consumer.next_message() => next?,
            };

            debug!(
                topic,
                partition = message.partition,
                offset = message.offset,
                bytes = message.payload.len(),
                "received message"
            );

            let disposition = self.process(&message).await?;
            if disposition.should_commit() {
                commit(consumer.as_mut(), &message).await;
                continue;
            }

            // Re-read the same offset so later messages never overtake it.
            consumer.rewind(&message).await?;
            tokio::select! {
                biased;
                () = shutdown.wait() => {
                    info!(topic, "consumer session stopping during retry backoff");
                    return Ok(());
                }
                () = tokio::time::sleep(self.context.settings.retry_backoff) => {}
            }
        }
    }
}

async fn commit(consumer: &mut dyn BusConsumer, message: &BusMessage) {
    match consumer.commit(message).await {
        Ok(()) => debug!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "committed offset"
        ),
        // The message is redelivered after the next restart; applying it
        // again is harmless.
        Err(err) => error!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            error = %err,
            "offset commit failed"
        ),
    }
}

impl std::fmt::Debug for TopicConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicConsumer")
            .field("binding", &self.binding)
            .field("settings", &self.context.settings)
            .finish_non_exhaustive()
    }
}
