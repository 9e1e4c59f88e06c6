//! In-process fan-out of changed projects to live watchers.
//!
//! Every subscriber owns a bounded queue. [`UpdateBroadcaster::publish`]
//! pushes onto each queue without waiting; a full queue sheds one update
//! according to the configured [`OverflowPolicy`] and counts it as dropped.
//! A subscription with an owner filter only ever has that owner's projects
//! queued, so other owners' traffic cannot push its updates out.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::Stream;
use projectd_core::Project;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Default per-subscriber queue capacity.
pub const DEFAULT_CAPACITY: usize = 100;

/// What a full subscriber queue gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued update to make room.
    #[default]
    DropOldest,
    /// Discard the update being published.
    DropNewest,
}

/// Broadcaster tuning, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Project>,
    dropped: u64,
    closed: bool,
}

#[derive(Debug, Default)]
struct SubscriberQueue {
    state: Mutex<QueueState>,
    ready: Notify,
}

enum Pop {
    Item(Project),
    Empty,
    Closed,
}

impl SubscriberQueue {
    fn push(&self, project: Project, config: BroadcastConfig) {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }

            if state.items.len() >= config.capacity {
                state.dropped = state.dropped.saturating_add(1);
                match config.overflow {
                    OverflowPolicy::DropOldest => {
                        state.items.pop_front();
                    }
                    OverflowPolicy::DropNewest => return,
                }
            }
            state.items.push_back(project);
        }
        self.ready.notify_one();
    }

    fn pop(&self) -> Pop {
        let mut state = lock(&self.state);
        match state.items.pop_front() {
            Some(project) => Pop::Item(project),
            None if state.closed => Pop::Closed,
            None => Pop::Empty,
        }
    }

    fn close(&self) {
        lock(&self.state).closed = true;
        self.ready.notify_one();
    }
}

#[derive(Debug)]
struct Subscriber {
    owner_filter: Option<String>,
    queue: Arc<SubscriberQueue>,
}

impl Subscriber {
    fn wants(&self, project: &Project) -> bool {
        self.owner_filter
            .as_deref()
            .is_none_or(|owner| project.owner == owner)
    }
}

#[derive(Debug, Default)]
struct Hub {
    closed: bool,
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

/// Publish/subscribe hub for project updates.
///
/// Cloning yields another handle to the same hub.
#[derive(Debug, Clone, Default)]
pub struct UpdateBroadcaster {
    hub: Arc<Mutex<Hub>>,
    config: BroadcastConfig,
}

impl UpdateBroadcaster {
    /// Create a broadcaster with the given queue tuning.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub::default())),
            config: BroadcastConfig {
                capacity: config.capacity.max(1),
                ..config
            },
        }
    }

    #[must_use]
    pub const fn config(&self) -> BroadcastConfig {
        self.config
    }

    /// Enqueue `project` for every matching subscriber and return how many
    /// queues received it. Never waits on a reader.
    pub fn publish(&self, project: &Project) -> usize {
        let hub = lock(&self.hub);
        if hub.closed {
            trace!(project = %project.storage_key(), "publish after close ignored");
            return 0;
        }

        let mut delivered: usize = 0;
        for subscriber in hub.subscribers.values().filter(|s| s.wants(project)) {
            subscriber.queue.push(project.clone(), self.config);
            delivered = delivered.saturating_add(1);
        }
        drop(hub);

        debug!(
            project = %project.storage_key(),
            status = %project.status,
            delivered,
            "published project update"
        );
        delivered
    }

    /// Open a subscription that yields only projects owned by
    /// `owner_filter`, or every project when it is `None`.
    pub fn subscribe(&self, owner_filter: Option<String>) -> ProjectSubscription {
        let queue = Arc::new(SubscriberQueue::default());
        let mut hub = lock(&self.hub);

        let id = hub.next_id;
        hub.next_id = hub.next_id.wrapping_add(1);
        if hub.closed {
            queue.close();
        } else {
            hub.subscribers.insert(
                id,
                Subscriber {
                    owner_filter: owner_filter.clone(),
                    queue: Arc::clone(&queue),
                },
            );
        }
        drop(hub);

        debug!(subscription = id, owner = ?owner_filter, "subscriber attached");
        ProjectSubscription {
            id,
            queue,
            owner_filter,
            hub: Arc::downgrade(&self.hub),
        }
    }

    /// Number of attached subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.hub).subscribers.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.hub).closed
    }

    /// Stop accepting publishes and release every subscriber.
    ///
    /// Idempotent. Subscribers still receive what was queued before the
    /// close, then see the end of their stream.
    pub fn close(&self) {
        let mut hub = lock(&self.hub);
        if hub.closed {
            return;
        }
        hub.closed = true;

        let released = hub.subscribers.len();
        for (_, subscriber) in hub.subscribers.drain() {
            subscriber.queue.close();
        }
        drop(hub);

        debug!(released, "broadcaster closed");
    }
}

/// Receiving end of one subscriber queue.
///
/// Dropping the subscription detaches it from the broadcaster.
#[derive(Debug)]
pub struct ProjectSubscription {
    id: u64,
    queue: Arc<SubscriberQueue>,
    owner_filter: Option<String>,
    hub: Weak<Mutex<Hub>>,
}

impl ProjectSubscription {
    /// Next project, or `None` once the broadcaster is closed and the queue
    /// is drained.
    pub async fn recv(&mut self) -> Option<Project> {
        loop {
            match self.queue.pop() {
                Pop::Item(project) => return Some(project),
                Pop::Empty => self.queue.ready.notified().await,
                Pop::Closed => return None,
            }
        }
    }

    /// Next project if one is already queued.
    pub fn try_recv(&mut self) -> Option<Project> {
        match self.queue.pop() {
            Pop::Item(project) => Some(project),
            Pop::Empty | Pop::Closed => None,
        }
    }

    /// Updates shed because this subscriber fell behind.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        lock(&self.queue.state).dropped
    }

    #[must_use]
    pub fn owner_filter(&self) -> Option<&str> {
        self.owner_filter.as_deref()
    }

    /// Adapt into a stream that ends when the broadcaster closes.
    pub fn into_stream(self) -> impl Stream<Item = Project> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|project| (project, subscription))
        })
    }
}

impl Drop for ProjectSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            lock(&hub).subscribers.remove(&self.id);
            debug!(subscription = self.id, "subscriber detached");
        }
    }
}
