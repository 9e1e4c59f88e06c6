//! Shared handler state.

use std::sync::Arc;

use projectd_events::{ShutdownListener, UpdateBroadcaster};
use projectd_store::ProjectRepository;

/// State shared by every route handler.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn ProjectRepository>,
    pub broadcaster: UpdateBroadcaster,
    /// Ends open watch streams so graceful shutdown is not held up by them.
    pub shutdown: Option<ShutdownListener>,
}

impl AppState {
    #[must_use]
    pub fn new(repository: Arc<dyn ProjectRepository>, broadcaster: UpdateBroadcaster) -> Self {
        Self {
            repository,
            broadcaster,
            shutdown: None,
        }
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownListener) -> Self {
        self.shutdown = Some(shutdown);
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("subscribers", &self.broadcaster.subscriber_count())
            .field("shutdown", &self.shutdown.is_some())
            .finish_non_exhaustive()
    }
}
