//! In-memory project repository.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use projectd_core::{Project, ProjectIdentifier, ProjectStatus};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::repository::{Page, ProjectRepository};

/// Project repository held in a process-local map.
///
/// Updates take the write lock for the whole read-modify-write, which gives
/// the same atomicity the database store gets from a single statement.
#[derive(Debug, Default)]
pub struct InMemoryProjectStore {
    projects: RwLock<HashMap<String, Project>>,
}

impl InMemoryProjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored projects.
    pub async fn len(&self) -> usize {
        self.projects.read().await.len()
    }

    /// Whether no project is stored.
    pub async fn is_empty(&self) -> bool {
        self.projects.read().await.is_empty()
    }

    async fn modify<F>(&self, id: &ProjectIdentifier, change: F) -> StoreResult<Project>
    where
        F: FnOnce(&mut Project) + Send,
    {
        let key = id.storage_key();
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found(&key))?;

        change(project);
        project.touch(Utc::now());
        Ok(project.clone())
    }
}

#[async_trait]
impl ProjectRepository for InMemoryProjectStore {
    async fn init(&self, id: &ProjectIdentifier) -> StoreResult<Project> {
        let key = id.storage_key();
        let mut projects = self.projects.write().await;

        if projects.contains_key(&key) {
            return Err(StoreError::already_exists(key));
        }

        let project = Project::new(id);
        projects.insert(key, project.clone());
        Ok(project)
    }

    async fn get(&self, id: &ProjectIdentifier) -> StoreResult<Project> {
        let key = id.storage_key();
        self.projects
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn list(&self, owner: &str, page: Page) -> StoreResult<Vec<Project>> {
        let projects = self.projects.read().await;

        let mut owned: Vec<&Project> = projects.values().filter(|p| p.owner == owner).collect();
        owned.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });

        let skip = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let take = usize::try_from(page.limit()).unwrap_or(usize::MAX);

        Ok(owned.into_iter().skip(skip).take(take).cloned().collect())
    }

    async fn update_data(
        &self,
        id: &ProjectIdentifier,
        data: serde_json::Value,
    ) -> StoreResult<Project> {
        self.modify(id, |project| project.data = data).await
    }

    async fn update_status(
        &self,
        id: &ProjectIdentifier,
        status: ProjectStatus,
    ) -> StoreResult<Project> {
        self.modify(id, |project| project.status = status).await
    }

    async fn update_artifact_url(
        &self,
        id: &ProjectIdentifier,
        url: &str,
    ) -> StoreResult<Project> {
        let url = url.to_string();
        self.modify(id, |project| project.artifact_url = Some(url))
            .await
    }

    async fn update_deploy_url(&self, id: &ProjectIdentifier, url: &str) -> StoreResult<Project> {
        let url = url.to_string();
        self.modify(id, |project| project.deploy_url = Some(url)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use projectd_core::UpdateCommand;
    use std::sync::Arc;

    fn id(owner: &str, name: &str) -> ProjectIdentifier {
        ProjectIdentifier::new(owner, name).unwrap()
    }

    #[tokio::test]
    async fn test_init_get_round_trip() {
        let store = InMemoryProjectStore::new();
        assert!(store.is_empty().await);

        store.init(&id("alice", "app1")).await.unwrap();
        let project = store.get(&id("alice", "app1")).await.unwrap();

        assert_eq!(project.status, ProjectStatus::New);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_init_conflict() {
        let store = InMemoryProjectStore::new();
        store.init(&id("alice", "app1")).await.unwrap();

        let result = store.init(&id("alice", "app1")).await;
        assert_eq!(result, Err(StoreError::already_exists("alice_app1")));
    }

    #[tokio::test]
    async fn test_update_missing_leaves_store_unchanged() {
        let store = InMemoryProjectStore::new();

        let result = store
            .update_status(&id("bob", "missing"), ProjectStatus::Running)
            .await;

        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let store = InMemoryProjectStore::new();
        store.init(&id("alice", "app1")).await.unwrap();
        let command = UpdateCommand::StatusChanged {
            id: id("alice", "app1"),
            status: ProjectStatus::Running,
        };

        let once = store.apply(&command).await.unwrap();
        let twice = store.apply(&command).await.unwrap();

        assert_eq!(once.status, twice.status);
        assert_eq!(once.artifact_url, twice.artifact_url);
        assert!(twice.updated_at >= once.updated_at);
    }

    #[tokio::test]
    async fn test_concurrent_updates_do_not_lose_fields() {
        let store = Arc::new(InMemoryProjectStore::new());
        store.init(&id("alice", "app1")).await.unwrap();

        let a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .update_artifact_url(&id("alice", "app1"), "https://cdn/a.zip")
                    .await
            })
        };
        let b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .update_status(&id("alice", "app1"), ProjectStatus::DeployPending)
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let project = store.get(&id("alice", "app1")).await.unwrap();
        assert_eq!(project.artifact_url.as_deref(), Some("https://cdn/a.zip"));
        assert_eq!(project.status, ProjectStatus::DeployPending);
    }

    #[tokio::test]
    async fn test_list_orders_by_creation() {
        let store = InMemoryProjectStore::new();
        for name in ["first", "second", "third"] {
            store.init(&id("alice", name)).await.unwrap();
        }

        let names: Vec<String> = store
            .list("alice", Page::new(Some(1), Some(2)))
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();

        assert_eq!(names, vec!["first", "second"]);
    }
}
