//! The State Repository contract.
//!
//! Every operation is addressed by [`ProjectIdentifier`] and every update is
//! an atomic find-and-modify that returns the post-update entity.

use async_trait::async_trait;
use projectd_core::{Project, ProjectIdentifier, ProjectStatus, UpdateCommand};

use crate::error::StoreResult;

/// Default page number for listings.
pub const DEFAULT_PAGE: u32 = 1;
/// Default page size for listings.
pub const DEFAULT_LIMIT: u32 = 10;

/// A 1-based page of an owner's projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    number: u32,
    limit: u32,
}

impl Page {
    /// Build a page, falling back to defaults for missing or non-positive
    /// values.
    #[must_use]
    pub fn new(number: Option<i64>, limit: Option<i64>) -> Self {
        let positive = |value: Option<i64>, default: u32| {
            value
                .filter(|v| *v > 0)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(default)
        };

        Self {
            number: positive(number, DEFAULT_PAGE),
            limit: positive(limit, DEFAULT_LIMIT),
        }
    }

    /// Page number, starting at 1.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Maximum projects per page.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of projects skipped before this page.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.number.saturating_sub(1)).saturating_mul(u64::from(self.limit))
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Durable storage of projects keyed by `owner_name`.
///
/// Implementations must make each update a single atomic read-modify-write
/// and must never move `updated_at` backwards.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Create a project with status `NEW` and an empty data object.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the identifier is taken.
    async fn init(&self, id: &ProjectIdentifier) -> StoreResult<Project>;

    /// Fetch a project.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no project is stored under `id`.
    async fn get(&self, id: &ProjectIdentifier) -> StoreResult<Project>;

    /// List an owner's projects ordered by creation time.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    async fn list(&self, owner: &str, page: Page) -> StoreResult<Vec<Project>>;

    /// Replace the opaque data payload.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no project is stored under `id`.
    async fn update_data(
        &self,
        id: &ProjectIdentifier,
        data: serde_json::Value,
    ) -> StoreResult<Project>;

    /// Overwrite the lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no project is stored under `id`.
    async fn update_status(
        &self,
        id: &ProjectIdentifier,
        status: ProjectStatus,
    ) -> StoreResult<Project>;

    /// Overwrite the artifact location.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no project is stored under `id`.
    async fn update_artifact_url(&self, id: &ProjectIdentifier, url: &str)
    -> StoreResult<Project>;

    /// Overwrite the deployment location.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no project is stored under `id`.
    async fn update_deploy_url(&self, id: &ProjectIdentifier, url: &str) -> StoreResult<Project>;

    /// Dispatch a decoded command to the matching update.
    ///
    /// # Errors
    ///
    /// Propagates the error of the dispatched operation.
    async fn apply(&self, command: &UpdateCommand) -> StoreResult<Project> {
        match command {
            UpdateCommand::StatusChanged { id, status } => self.update_status(id, *status).await,
            UpdateCommand::ArtifactUrlChanged { id, url } => {
                self.update_artifact_url(id, url).await
            }
            UpdateCommand::DeployUrlChanged { id, url } => self.update_deploy_url(id, url).await,
        }
    }
}
