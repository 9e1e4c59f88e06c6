//! Event-driven project state synchronization.
//!
//! Consumes project update events from a message bus and keeps the project
//! repository and live watchers in sync:
//!
//! - **Schema resolution**: per-topic Avro codecs fetched from a registry and cached
//! - **Decoding**: payloads mapped to typed [`UpdateCommand`](projectd_core::UpdateCommand)s
//! - **Delivery**: at-least-once, commit-after-apply, one message at a time per topic
//! - **Broadcast**: bounded, non-blocking fan-out of changed projects
//! - **Supervision**: crashed topic sessions restart after a fixed cool-down
//!
//! # Example
//!
//! ```ignore
//! let shutdown = ShutdownCoordinator::new();
//! let pipeline = Pipeline::new(context, TopicBinding::defaults(), RestartPolicy::default());
//! let handle = pipeline.start(&shutdown);
//!
//! shutdown.initiate(ShutdownSignal::Programmatic);
//! handle.join().await;
//! broadcaster.close();
//! ```

pub mod broadcast;
pub mod bus;
pub mod codec;
pub mod consumer;
pub mod decode;
pub mod error;
pub mod pipeline;
pub mod schema;
pub mod shutdown;
pub mod supervisor;

// Re-export main types
pub use broadcast::{BroadcastConfig, OverflowPolicy, ProjectSubscription, UpdateBroadcaster};
pub use bus::{BusConnector, BusConsumer, BusMessage, MemoryBus};
pub use codec::{Codec, WireFormat};
pub use consumer::{
    ConsumerContext, ConsumerSettings, Disposition, SkipReason, TopicBinding, TopicConsumer,
};
pub use decode::{EventKind, decode};
pub use error::{BusError, DecodeError, PipelineError, Result, SchemaError};
pub use pipeline::{Pipeline, PipelineHandle};
pub use schema::{HttpSchemaRegistry, SchemaRegistry, SchemaResolver, StaticSchemaRegistry};
pub use shutdown::{ShutdownCoordinator, ShutdownListener, ShutdownSignal};
pub use supervisor::{RestartPolicy, SupervisorExit, supervise};

#[cfg(feature = "kafka")]
pub use bus::KafkaConnector;
