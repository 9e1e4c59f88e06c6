//! Configuration loading and validation
//!
//! # Hierarchy
//!
//! Configuration is resolved in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. TOML file given by `--config` / `PROJECTD_CONFIG`
//! 3. Environment variables: `PROJECTD_*`
//! 4. CLI flags
//!
//! # Example Config
//!
//! ```toml
//! env = "prod"
//!
//! [server]
//! bind = "0.0.0.0:50051"
//!
//! [schema_registry]
//! url = "http://registry:6767"
//! wire_format = "binary"
//!
//! [[schema_registry.publish]]
//! topic = "ProjectUpdated"
//! path = "schemas/project-updated.avsc"
//!
//! [bus]
//! brokers = "kafka-1:9092,kafka-2:9092"
//!
//! [[bus.topics]]
//! name = "ProjectStatus"
//! kind = "ProjectStatus"
//!
//! [storage]
//! backend = "surreal"
//! url = "ws://surreal:8000"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use projectd_events::{
    BroadcastConfig, ConsumerSettings, EventKind, OverflowPolicy, RestartPolicy, TopicBinding,
    WireFormat,
};
use projectd_store::StoreConfig;
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "PROJECTD_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("invalid configuration: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub env: Environment,
    pub server: ServerSection,
    pub schema_registry: SchemaRegistrySection,
    pub bus: BusSection,
    pub storage: StorageSection,
    pub consumer: ConsumerSection,
    pub broadcast: BroadcastSection,
}

/// Deployment environment; selects the log format and default filter.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        parse_variant("env", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind: String,
    pub cors_origin: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// Confluent-compatible registry over HTTP.
    #[default]
    Http,
    /// In-process registry holding only the published schemas.
    Local,
}

/// A schema this service owns and registers at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PublishedSchema {
    pub topic: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaRegistrySection {
    pub backend: RegistryBackend,
    pub url: String,
    pub timeout_ms: u64,
    pub wire_format: WireFormat,
    pub publish: Vec<PublishedSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TopicSection {
    pub name: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BusSection {
    /// Comma-separated Kafka bootstrap servers.
    pub brokers: String,
    pub group_id: String,
    pub topics: Vec<TopicSection>,
    /// Extra client properties passed through to the Kafka consumer.
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Surreal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub backend: StorageBackend,
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerSection {
    pub restart_cooldown_ms: u64,
    pub retry_backoff_ms: u64,
    pub max_restarts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BroadcastSection {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:50051".to_string(),
            cors_origin: "*".to_string(),
        }
    }
}

impl Default for SchemaRegistrySection {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::default(),
            url: "http://localhost:6767".to_string(),
            timeout_ms: 5_000,
            wire_format: WireFormat::default(),
            publish: Vec::new(),
        }
    }
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: projectd_events::consumer::DEFAULT_GROUP_ID.to_string(),
            topics: TopicBinding::defaults()
                .into_iter()
                .map(|binding| TopicSection {
                    name: binding.topic,
                    kind: binding.kind,
                })
                .collect(),
            properties: BTreeMap::new(),
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        let store = StoreConfig::remote("mem://");
        Self {
            backend: StorageBackend::default(),
            url: store.url,
            namespace: store.namespace,
            database: store.database,
            username: None,
            password: None,
        }
    }
}

impl Default for ConsumerSection {
    fn default() -> Self {
        Self {
            restart_cooldown_ms: 5_000,
            retry_backoff_ms: 1_000,
            max_restarts: None,
        }
    }
}

impl Default for BroadcastSection {
    fn default() -> Self {
        let defaults = BroadcastConfig::default();
        Self {
            capacity: defaults.capacity,
            overflow: defaults.overflow,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════

impl Config {
    /// Defaults overlaid with the TOML file at `path`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML for
    /// this schema.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => load_toml_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Apply `PROJECTD_*` overrides from `vars`. Keys without the prefix and
    /// unrecognised keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a recognised key has a value
    /// that does not parse.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let key = key.as_ref();
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value: String = value.into();

            match name {
                "ENV" => self.env = parse_variant(key, &value)?,
                "BIND" => self.server.bind = value,
                "CORS_ORIGIN" => self.server.cors_origin = value,
                "SCHEMA_REGISTRY_URL" => self.schema_registry.url = value,
                "SCHEMA_REGISTRY_BACKEND" => {
                    self.schema_registry.backend = parse_variant(key, &value)?;
                }
                "SCHEMA_REGISTRY_TIMEOUT_MS" => {
                    self.schema_registry.timeout_ms = parse_number(key, &value)?;
                }
                "WIRE_FORMAT" => self.schema_registry.wire_format = parse_variant(key, &value)?,
                "BROKERS" => self.bus.brokers = value,
                "GROUP_ID" => self.bus.group_id = value,
                "STORAGE_BACKEND" => self.storage.backend = parse_variant(key, &value)?,
                "STORAGE_URL" => self.storage.url = value,
                "STORAGE_NAMESPACE" => self.storage.namespace = value,
                "STORAGE_DATABASE" => self.storage.database = value,
                "STORAGE_USERNAME" => self.storage.username = Some(value),
                "STORAGE_PASSWORD" => self.storage.password = Some(value),
                "RESTART_COOLDOWN_MS" => {
                    self.consumer.restart_cooldown_ms = parse_number(key, &value)?;
                }
                "RETRY_BACKOFF_MS" => self.consumer.retry_backoff_ms = parse_number(key, &value)?,
                "MAX_RESTARTS" => self.consumer.max_restarts = Some(parse_number(key, &value)?),
                "BROADCAST_CAPACITY" => self.broadcast.capacity = parse_number(key, &value)?,
                "BROADCAST_OVERFLOW" => self.broadcast.overflow = parse_variant(key, &value)?,
                _ => {}
            }
        }

        Ok(())
    }

    /// Reject configurations the service cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.bus.topics.is_empty() {
            return Err(ConfigError::Validation(
                "bus.topics must name at least one topic".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = self
            .bus
            .topics
            .iter()
            .find(|topic| !seen.insert(topic.name.as_str()))
        {
            return Err(ConfigError::Validation(format!(
                "topic '{}' is bound more than once",
                duplicate.name
            )));
        }

        if self.bus.topics.iter().any(|topic| topic.name.is_empty()) {
            return Err(ConfigError::Validation(
                "topic names must not be empty".to_string(),
            ));
        }

        if self.broadcast.capacity == 0 {
            return Err(ConfigError::Validation(
                "broadcast.capacity must be at least 1".to_string(),
            ));
        }

        if self.consumer.restart_cooldown_ms == 0 {
            return Err(ConfigError::Validation(
                "consumer.restart_cooldown_ms must be greater than 0".to_string(),
            ));
        }

        if self.schema_registry.backend == RegistryBackend::Http {
            self.registry_url()?;
        }

        Ok(())
    }

    /// Parsed registry base URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if the URL does not parse.
    pub fn registry_url(&self) -> Result<Url> {
        Url::parse(&self.schema_registry.url).map_err(|e| {
            ConfigError::Validation(format!(
                "schema_registry.url '{}' is not a valid URL: {e}",
                self.schema_registry.url
            ))
        })
    }

    #[must_use]
    pub fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.schema_registry.timeout_ms)
    }

    #[must_use]
    pub fn topic_bindings(&self) -> Vec<TopicBinding> {
        self.bus
            .topics
            .iter()
            .map(|topic| TopicBinding::new(topic.name.clone(), topic.kind))
            .collect()
    }

    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        let config = StoreConfig::remote(self.storage.url.clone())
            .with_namespace(self.storage.namespace.clone())
            .with_database(self.storage.database.clone());

        match (&self.storage.username, &self.storage.password) {
            (Some(username), Some(password)) => config.with_credentials(username, password),
            _ => config,
        }
    }

    #[must_use]
    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            group_id: self.bus.group_id.clone(),
            retry_backoff: Duration::from_millis(self.consumer.retry_backoff_ms),
        }
    }

    #[must_use]
    pub fn restart_policy(&self) -> RestartPolicy {
        let policy = RestartPolicy::fixed(Duration::from_millis(self.consumer.restart_cooldown_ms));
        match self.consumer.max_restarts {
            Some(max) => policy.with_max_restarts(max),
            None => policy,
        }
    }

    #[must_use]
    pub fn broadcast_config(&self) -> BroadcastConfig {
        BroadcastConfig {
            capacity: self.broadcast.capacity,
            overflow: self.broadcast.overflow,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

fn load_toml_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Parse a unit enum variant by its serde name.
fn parse_variant<T: DeserializeOwned>(key: &str, value: &str) -> Result<T> {
    let deserializer: serde::de::value::StrDeserializer<'_, serde::de::value::Error> =
        value.into_deserializer();
    T::deserialize(deserializer).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
