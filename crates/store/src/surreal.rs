//! SurrealDB-backed project repository.
//!
//! Connection management follows the usual `Surreal<Any>` shape so the same
//! store runs against `mem://` in tests and `ws://` in production.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use projectd_core::{Project, ProjectIdentifier, ProjectStatus};
use serde::{Deserialize, Serialize};
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use tracing::debug;

use crate::error::{StoreError, StoreResult, from_surrealdb_error};
use crate::repository::{Page, ProjectRepository};

const TABLE: &str = "project";

/// Configuration for the SurrealDB store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Connection URL (e.g., "mem://", "ws://localhost:8000")
    pub url: String,
    /// Namespace to use
    pub namespace: String,
    /// Database to use
    pub database: String,
    /// Optional root credentials
    pub credentials: Option<Credentials>,
}

/// Root credentials for authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl StoreConfig {
    /// Create an in-memory configuration for testing.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            url: "mem://".to_string(),
            namespace: "projectd".to_string(),
            database: "test".to_string(),
            credentials: None,
        }
    }

    /// Create a configuration for an arbitrary endpoint.
    #[must_use]
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: "projectd".to_string(),
            database: "projects".to_string(),
            credentials: None,
        }
    }

    /// Set credentials for authentication.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Row shape in the `project` table.
///
/// Timestamps are integer microseconds so `math::max` can keep `updated_at`
/// monotonic inside the update statement. The opaque payload is kept as JSON
/// text.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProjectRecord {
    owner: String,
    name: String,
    data: String,
    status: ProjectStatus,
    #[serde(default)]
    artifact_url: Option<String>,
    #[serde(default)]
    deploy_url: Option<String>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    updated_at: DateTime<Utc>,
}

impl ProjectRecord {
    fn from_project(project: &Project) -> StoreResult<Self> {
        let data = serde_json::to_string(&project.data)
            .map_err(|e| StoreError::serialization(e.to_string()))?;

        Ok(Self {
            owner: project.owner.clone(),
            name: project.name.clone(),
            data,
            status: project.status,
            artifact_url: project.artifact_url.clone(),
            deploy_url: project.deploy_url.clone(),
            created_at: project.created_at,
            updated_at: project.updated_at,
        })
    }

    fn into_project(self) -> StoreResult<Project> {
        let data = serde_json::from_str(&self.data)
            .map_err(|e| StoreError::serialization(e.to_string()))?;

        Ok(Project {
            owner: self.owner,
            name: self.name,
            data,
            status: self.status,
            artifact_url: self.artifact_url,
            deploy_url: self.deploy_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Connection to the project database.
#[derive(Debug, Clone)]
pub struct SurrealProjectStore {
    db: Arc<Surreal<Any>>,
    config: StoreConfig,
}

impl SurrealProjectStore {
    /// Connect to the database with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or authentication fails.
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        let db = Surreal::<Any>::init();

        db.connect(&config.url)
            .await
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;

        if let Some(creds) = &config.credentials {
            db.signin(Root {
                username: &creds.username,
                password: &creds.password,
            })
            .await
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;

        debug!(url = %config.url, namespace = %config.namespace, database = %config.database, "connected to project store");

        Ok(Self {
            db: Arc::new(db),
            config,
        })
    }

    /// Get the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Define the project table and its unique `(owner, name)` index.
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails.
    pub async fn initialize_schema(&self) -> StoreResult<()> {
        let schema = include_str!("schema.surql");

        self.db
            .query(schema)
            .await
            .map_err(|e| StoreError::schema(e.to_string()))?
            .check()
            .map_err(|e| StoreError::schema(e.to_string()))?;

        Ok(())
    }

    /// Check if the database is healthy.
    ///
    /// # Errors
    ///
    /// Returns an error if the health check fails.
    pub async fn health_check(&self) -> StoreResult<()> {
        self.db
            .query("INFO FOR DB")
            .await
            .map_err(|e| from_surrealdb_error(e, TABLE))?;

        Ok(())
    }

    /// Set one field and advance `updated_at` in a single statement.
    async fn update_field<V>(
        &self,
        id: &ProjectIdentifier,
        field: &'static str,
        value: V,
    ) -> StoreResult<Project>
    where
        V: Serialize + Send + 'static,
    {
        let key = id.storage_key();
        let query = format!(
            "UPDATE type::thing('{TABLE}', $key) \
             SET {field} = $value, updated_at = math::max([updated_at, $now]) \
             RETURN AFTER"
        );

        let record: Option<ProjectRecord> = self
            .db
            .query(query)
            .bind(("key", key.clone()))
            .bind(("value", value))
            .bind(("now", Utc::now().timestamp_micros()))
            .await
            .map_err(|e| from_surrealdb_error(e, &key))?
            .take(0)
            .map_err(|e| from_surrealdb_error(e, &key))?;

        debug!(project = %key, field, found = record.is_some(), "applied field update");

        record
            .ok_or_else(|| StoreError::not_found(&key))
            .and_then(ProjectRecord::into_project)
    }
}

#[async_trait]
impl ProjectRepository for SurrealProjectStore {
    async fn init(&self, id: &ProjectIdentifier) -> StoreResult<Project> {
        let key = id.storage_key();
        let record = ProjectRecord::from_project(&Project::new(id))?;

        let created: Option<ProjectRecord> = self
            .db
            .create((TABLE, key.clone()))
            .content(record)
            .await
            .map_err(|e| from_surrealdb_error(e, &key))?;

        created
            .ok_or_else(|| StoreError::query_failed(format!("failed to create project '{key}'")))
            .and_then(ProjectRecord::into_project)
    }

    async fn get(&self, id: &ProjectIdentifier) -> StoreResult<Project> {
        let key = id.storage_key();

        let record: Option<ProjectRecord> = self
            .db
            .select((TABLE, key.clone()))
            .await
            .map_err(|e| from_surrealdb_error(e, &key))?;

        record
            .ok_or_else(|| StoreError::not_found(&key))
            .and_then(ProjectRecord::into_project)
    }

    async fn list(&self, owner: &str, page: Page) -> StoreResult<Vec<Project>> {
        let records: Vec<ProjectRecord> = self
            .db
            .query(
                "SELECT * FROM type::table($table) WHERE owner = $owner \
                 ORDER BY created_at ASC, name ASC LIMIT $limit START $start",
            )
            .bind(("table", TABLE))
            .bind(("owner", owner.to_string()))
            .bind(("limit", page.limit()))
            .bind(("start", page.offset()))
            .await
            .map_err(|e| from_surrealdb_error(e, owner))?
            .take(0)
            .map_err(|e| from_surrealdb_error(e, owner))?;

        records.into_iter().map(ProjectRecord::into_project).collect()
    }

    async fn update_data(
        &self,
        id: &ProjectIdentifier,
        data: serde_json::Value,
    ) -> StoreResult<Project> {
        let text =
            serde_json::to_string(&data).map_err(|e| StoreError::serialization(e.to_string()))?;
        self.update_field(id, "data", text).await
    }

    async fn update_status(
        &self,
        id: &ProjectIdentifier,
        status: ProjectStatus,
    ) -> StoreResult<Project> {
        self.update_field(id, "status", status.as_str()).await
    }

    async fn update_artifact_url(
        &self,
        id: &ProjectIdentifier,
        url: &str,
    ) -> StoreResult<Project> {
        self.update_field(id, "artifact_url", url.to_string()).await
    }

    async fn update_deploy_url(&self, id: &ProjectIdentifier, url: &str) -> StoreResult<Project> {
        self.update_field(id, "deploy_url", url.to_string()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use projectd_core::UpdateCommand;

    async fn setup_store() -> SurrealProjectStore {
        let store = SurrealProjectStore::connect(StoreConfig::in_memory())
            .await
            .expect("in-memory store should connect");
        store
            .initialize_schema()
            .await
            .expect("schema should initialize");
        store
    }

    fn id(owner: &str, name: &str) -> ProjectIdentifier {
        ProjectIdentifier::new(owner, name).unwrap()
    }

    #[tokio::test]
    async fn test_store_config_in_memory() {
        let config = StoreConfig::in_memory();
        assert_eq!(config.url, "mem://");
        assert_eq!(config.namespace, "projectd");
        assert!(config.credentials.is_none());
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = setup_store().await;
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_init_and_get() {
        let store = setup_store().await;

        let created = store.init(&id("alice", "app1")).await.unwrap();
        assert_eq!(created.status, ProjectStatus::New);

        let fetched = store.get(&id("alice", "app1")).await.unwrap();
        assert_eq!(fetched.owner, "alice");
        assert_eq!(fetched.name, "app1");
        assert_eq!(fetched.data, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_init_twice_is_already_exists() {
        let store = setup_store().await;

        store.init(&id("alice", "app1")).await.unwrap();
        let second = store.init(&id("alice", "app1")).await;

        assert!(matches!(second, Err(StoreError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = setup_store().await;
        let result = store.get(&id("bob", "missing")).await;
        assert_eq!(result, Err(StoreError::not_found("bob_missing")));
    }

    #[tokio::test]
    async fn test_update_status_returns_post_update_entity() {
        let store = setup_store().await;
        let created = store.init(&id("alice", "app1")).await.unwrap();

        let updated = store
            .update_status(&id("alice", "app1"), ProjectStatus::Running)
            .await
            .unwrap();

        assert_eq!(updated.status, ProjectStatus::Running);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = setup_store().await;

        let result = store
            .update_status(&id("bob", "missing"), ProjectStatus::Running)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));

        // UPDATE must not have created the record
        assert!(store.get(&id("bob", "missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_apply_url_commands() {
        let store = setup_store().await;
        store.init(&id("alice", "app1")).await.unwrap();

        store
            .apply(&UpdateCommand::ArtifactUrlChanged {
                id: id("alice", "app1"),
                url: "https://cdn/app1.zip".to_string(),
            })
            .await
            .unwrap();
        let project = store
            .apply(&UpdateCommand::DeployUrlChanged {
                id: id("alice", "app1"),
                url: "https://app1.example.com".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(project.artifact_url.as_deref(), Some("https://cdn/app1.zip"));
        assert_eq!(project.deploy_url.as_deref(), Some("https://app1.example.com"));
    }

    #[tokio::test]
    async fn test_update_data_replaces_payload() {
        let store = setup_store().await;
        store.init(&id("alice", "app1")).await.unwrap();

        let data = serde_json::json!({"pages": [{"title": "home"}], "theme": "dark"});
        let updated = store
            .update_data(&id("alice", "app1"), data.clone())
            .await
            .unwrap();

        assert_eq!(updated.data, data);
        assert_eq!(store.get(&id("alice", "app1")).await.unwrap().data, data);
    }

    #[tokio::test]
    async fn test_list_is_scoped_and_paged() {
        let store = setup_store().await;
        for name in ["a", "b", "c"] {
            store.init(&id("alice", name)).await.unwrap();
        }
        store.init(&id("carol", "x")).await.unwrap();

        let all = store.list("alice", Page::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|p| p.owner == "alice"));

        let second = store
            .list("alice", Page::new(Some(2), Some(2)))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "c");
    }
}
