//! Schema resolution against a Confluent-compatible registry.
//!
//! [`SchemaResolver`] compiles each topic's `{topic}-value` subject once and
//! serves the cached [`Codec`] afterwards. The cache is never invalidated;
//! picking up a new schema version requires a restart.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::codec::{Codec, WireFormat};
use crate::error::SchemaError;

/// Content type the registry expects on writes.
pub const REGISTRY_CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

/// Registry subject holding the value schema of `topic`.
#[must_use]
pub fn value_subject(topic: &str) -> String {
    format!("{topic}-value")
}

/// A schema version as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisteredSchema {
    #[serde(default)]
    pub id: Option<u32>,
    pub schema: String,
}

/// Remote store of schema versions.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Latest version of `subject`.
    async fn latest_schema(&self, subject: &str) -> Result<RegisteredSchema, SchemaError>;

    /// Whether `subject` has at least one version.
    async fn subject_exists(&self, subject: &str) -> Result<bool, SchemaError>;

    /// Register `schema` under `subject`, returning its id when reported.
    async fn register_schema(&self, subject: &str, schema: &str)
    -> Result<Option<u32>, SchemaError>;
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    #[serde(default)]
    id: Option<u32>,
}

/// Registry client speaking the Confluent REST protocol.
#[derive(Debug, Clone)]
pub struct HttpSchemaRegistry {
    base_url: Url,
    http_client: reqwest::Client,
}

impl HttpSchemaRegistry {
    /// Create a client for the registry at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Unavailable` if the HTTP client cannot be built.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, SchemaError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchemaError::unavailable(base_url.as_str(), e.to_string()))?;

        Ok(Self {
            base_url,
            http_client,
        })
    }

    fn versions_url(&self, subject: &str) -> String {
        format!(
            "{}/subjects/{subject}/versions",
            self.base_url.as_str().trim_end_matches('/')
        )
    }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    async fn latest_schema(&self, subject: &str) -> Result<RegisteredSchema, SchemaError> {
        let url = format!("{}/latest", self.versions_url(subject));
        debug!(subject, url = %url, "fetching latest schema");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| SchemaError::unavailable(subject, e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(SchemaError::unavailable(
                subject,
                format!("registry returned {status}"),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| SchemaError::unavailable(subject, format!("unreadable body: {e}")))
    }

    async fn subject_exists(&self, subject: &str) -> Result<bool, SchemaError> {
        let response = self
            .http_client
            .get(self.versions_url(subject))
            .send()
            .await
            .map_err(|e| SchemaError::unavailable(subject, e.to_string()))?;

        Ok(response.status() == StatusCode::OK)
    }

    async fn register_schema(
        &self,
        subject: &str,
        schema: &str,
    ) -> Result<Option<u32>, SchemaError> {
        let body = serde_json::to_vec(&serde_json::json!({ "schema": schema }))
            .map_err(|e| SchemaError::invalid(subject, e.to_string()))?;

        let response = self
            .http_client
            .post(self.versions_url(subject))
            .header(CONTENT_TYPE, REGISTRY_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| SchemaError::unavailable(subject, e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let detail = response.text().await.unwrap_or_default();
            return Err(SchemaError::unavailable(
                subject,
                format!("registration returned {status}: {detail}"),
            ));
        }

        let registered: RegisterResponse = response
            .json()
            .await
            .unwrap_or(RegisterResponse { id: None });
        Ok(registered.id)
    }
}

/// Registry held in process memory.
///
/// Serves schemas registered locally, for deployments without a registry
/// service and for tests.
#[derive(Debug, Default)]
pub struct StaticSchemaRegistry {
    subjects: RwLock<HashMap<String, RegisteredSchema>>,
}

impl StaticSchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `schema` as the latest version of `subject`.
    pub fn insert(&self, subject: impl Into<String>, schema: impl Into<String>) -> u32 {
        let mut subjects = self
            .subjects
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let id = u32::try_from(subjects.len()).map_or(u32::MAX, |n| n.saturating_add(1));
        subjects.insert(
            subject.into(),
            RegisteredSchema {
                id: Some(id),
                schema: schema.into(),
            },
        );
        id
    }
}

#[async_trait]
impl SchemaRegistry for StaticSchemaRegistry {
    async fn latest_schema(&self, subject: &str) -> Result<RegisteredSchema, SchemaError> {
        self.subjects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject)
            .cloned()
            .ok_or_else(|| SchemaError::unavailable(subject, "subject not registered"))
    }

    async fn subject_exists(&self, subject: &str) -> Result<bool, SchemaError> {
        Ok(self
            .subjects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(subject))
    }

    async fn register_schema(
        &self,
        subject: &str,
        schema: &str,
    ) -> Result<Option<u32>, SchemaError> {
        Ok(Some(self.insert(subject, schema)))
    }
}

/// Topic-keyed cache of compiled codecs.
pub struct SchemaResolver {
    registry: Arc<dyn SchemaRegistry>,
    format: WireFormat,
    cache: RwLock<HashMap<String, Arc<Codec>>>,
}

impl SchemaResolver {
    /// Create a resolver compiling every schema for `format`.
    pub fn new(registry: Arc<dyn SchemaRegistry>, format: WireFormat) -> Self {
        Self {
            registry,
            format,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Wire format every resolved codec decodes.
    #[must_use]
    pub const fn format(&self) -> WireFormat {
        self.format
    }

    fn cached(&self, topic: &str) -> Option<Arc<Codec>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
    }

    /// Whether `topic` has been resolved.
    #[must_use]
    pub fn is_cached(&self, topic: &str) -> bool {
        self.cached(topic).is_some()
    }

    /// Codec for `topic`, fetching and compiling it on first use.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Unavailable` if the registry cannot serve the
    /// subject and `SchemaError::Invalid` if the schema does not compile.
    pub async fn resolve(&self, topic: &str) -> Result<Arc<Codec>, SchemaError> {
        if let Some(codec) = self.cached(topic) {
            return Ok(codec);
        }

        let subject = value_subject(topic);
        let registered = self.registry.latest_schema(&subject).await?;
        let codec = Codec::compile(&subject, &registered.schema, self.format)?
            .with_schema_id(registered.id);

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let codec = Arc::clone(
            cache
                .entry(topic.to_string())
                .or_insert_with(|| Arc::new(codec)),
        );
        drop(cache);

        info!(topic, subject = %subject, schema_id = ?codec.schema_id(), "resolved schema");
        Ok(codec)
    }

    /// Resolve every topic up front.
    ///
    /// # Errors
    ///
    /// Returns the first resolution failure.
    pub async fn preload(&self, topics: &[String]) -> Result<(), SchemaError> {
        for topic in topics {
            self.resolve(topic).await?;
        }
        Ok(())
    }

    /// Publish a locally owned schema for `topic` unless its subject exists.
    ///
    /// Returns `true` if a new subject was registered.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Invalid` if `schema` does not compile and
    /// `SchemaError::Unavailable` if the registry rejects it.
    pub async fn register(&self, topic: &str, schema: &str) -> Result<bool, SchemaError> {
        let subject = value_subject(topic);
        Codec::compile(&subject, schema, self.format)?;

        if self.registry.subject_exists(&subject).await? {
            debug!(topic, subject = %subject, "subject already registered");
            return Ok(false);
        }

        let id = self.registry.register_schema(&subject, schema).await?;
        info!(topic, subject = %subject, schema_id = ?id, "registered schema");
        Ok(true)
    }
}

impl std::fmt::Debug for SchemaResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached: Vec<String> = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("SchemaResolver")
            .field("format", &self.format)
            .field("cached", &cached)
            .finish_non_exhaustive()
    }
}
