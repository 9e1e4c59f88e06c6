//! Composition root: wires storage, schemas, the bus, the pipeline and the
//! HTTP server together and runs them until shutdown.
//!
//! ## Startup order
//!
//! 1. Storage connect + schema init
//! 2. Schema registration for published topics
//! 3. Schema preload for every consumed topic (fatal on failure)
//! 4. Broadcaster
//! 5. Pipeline start
//! 6. HTTP server
//!
//! ## Shutdown
//!
//! SIGINT/SIGTERM initiates shutdown. The HTTP server drains first, then
//! every consumer finishes its in-flight message, and only then is the
//! broadcaster closed.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use projectd_events::shutdown::install_signal_handlers;
use projectd_events::{
    BusConnector, ConsumerContext, HttpSchemaRegistry, Pipeline, SchemaRegistry,
    SchemaResolver, ShutdownCoordinator, ShutdownSignal, StaticSchemaRegistry, SupervisorExit,
    UpdateBroadcaster,
};
use projectd_store::{InMemoryProjectStore, ProjectRepository, SurrealProjectStore};
use projectd_web::{AppState, ServerConfig, create_router, run_server};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::{Config, PublishedSchema, RegistryBackend, StorageBackend};

/// Run the service until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if any startup step fails or the HTTP server stops with
/// an error.
pub async fn run(config: Config) -> Result<()> {
    let start_time = Instant::now();

    let repository = connect_storage(&config)
        .await
        .context("storage initialisation failed")?;

    let resolver = Arc::new(SchemaResolver::new(
        schema_registry(&config)?,
        config.schema_registry.wire_format,
    ));
    publish_schemas(&resolver, &config.schema_registry.publish).await?;

    let bindings = config.topic_bindings();
    let topics: Vec<String> = bindings.iter().map(|b| b.topic.clone()).collect();
    resolver
        .preload(&topics)
        .await
        .context("failed to resolve schemas for consumed topics")?;

    let broadcaster = UpdateBroadcaster::new(config.broadcast_config());
    let shutdown = Arc::new(ShutdownCoordinator::new());
    let signals = install_signal_handlers(Arc::clone(&shutdown));

    let context = ConsumerContext {
        resolver,
        repository: Arc::clone(&repository),
        broadcaster: broadcaster.clone(),
        connector: kafka_connector(&config)?,
        settings: config.consumer_settings(),
    };
    let pipeline = Pipeline::new(context, bindings, config.restart_policy()).start(&shutdown);

    let server_config = ServerConfig {
        bind_address: config.server.bind.clone(),
        cors_origin: config.server.cors_origin.clone(),
    };
    let state = AppState::new(repository, broadcaster.clone()).with_shutdown(shutdown.listener());
    let router = create_router(state, &server_config)?;
    let listener = TcpListener::bind(&server_config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", server_config.bind_address))?;

    info!(
        elapsed = ?start_time.elapsed(),
        topics = ?topics,
        "projectd started"
    );

    let served = run_server(listener, router, shutdown.listener()).await;
    if let Err(e) = &served {
        error!(error = %e, "HTTP server failed");
    }
    if shutdown.initiate(ShutdownSignal::Programmatic) {
        info!("shutdown initiated after HTTP server exit");
    }

    for (topic, exit) in pipeline.join().await {
        if let SupervisorExit::GaveUp { restarts, last_error } = exit {
            warn!(topic = %topic, restarts, error = %last_error, "consumer had given up before shutdown");
        }
    }
    broadcaster.close();
    signals.abort();

    served.context("HTTP server failed")?;
    info!("projectd stopped gracefully");
    Ok(())
}

async fn connect_storage(config: &Config) -> Result<Arc<dyn ProjectRepository>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            warn!("using in-memory storage; projects are lost on exit");
            Ok(Arc::new(InMemoryProjectStore::new()))
        }
        StorageBackend::Surreal => {
            let store = SurrealProjectStore::connect(config.store_config())
                .await
                .context("failed to connect to SurrealDB")?;
            store
                .initialize_schema()
                .await
                .context("failed to define project schema")?;
            store
                .health_check()
                .await
                .context("SurrealDB health check failed")?;
            info!(url = %config.storage.url, "SurrealDB connected and healthy");
            Ok(Arc::new(store))
        }
    }
}

fn schema_registry(config: &Config) -> Result<Arc<dyn SchemaRegistry>> {
    match config.schema_registry.backend {
        RegistryBackend::Http => {
            let registry = HttpSchemaRegistry::new(config.registry_url()?, config.registry_timeout())
                .context("failed to build schema registry client")?;
            Ok(Arc::new(registry))
        }
        RegistryBackend::Local => {
            info!("using local schema registry");
            Ok(Arc::new(StaticSchemaRegistry::new()))
        }
    }
}

async fn publish_schemas(resolver: &SchemaResolver, schemas: &[PublishedSchema]) -> Result<()> {
    for published in schemas {
        let text = tokio::fs::read_to_string(&published.path)
            .await
            .with_context(|| format!("failed to read schema {}", published.path.display()))?;
        resolver
            .register(&published.topic, &text)
            .await
            .with_context(|| format!("failed to register schema for {}", published.topic))?;
    }
    Ok(())
}

#[cfg(feature = "kafka")]
fn kafka_connector(config: &Config) -> Result<Arc<dyn BusConnector>> {
    let connector = config.bus.properties.iter().fold(
        projectd_events::KafkaConnector::new(config.bus.brokers.clone()),
        |connector, (key, value)| connector.with_property(key, value),
    );
    info!(brokers = %config.bus.brokers, group = %config.bus.group_id, "using Kafka bus");
    Ok(Arc::new(connector))
}

#[cfg(not(feature = "kafka"))]
fn kafka_connector(_config: &Config) -> Result<Arc<dyn BusConnector>> {
    anyhow::bail!("consuming from Kafka requires building with the `kafka` feature")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    const STATUS_SCHEMA: &str = r#"{
        "type": "record",
        "name": "ProjectStatus",
        "fields": [
            {"name": "id", "type": "string"},
            {"name": "status", "type": "string"}
        ]
    }"#;

    #[tokio::test]
    async fn test_memory_storage_backend() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        let repository = connect_storage(&config).await.unwrap();
        assert!(repository.list("alice", Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_surreal_storage_backend_in_memory() {
        let config = Config::default();
        assert!(connect_storage(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_local_registry_serves_published_schemas() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(STATUS_SCHEMA.as_bytes()).unwrap();

        let mut config = Config::default();
        config.schema_registry.backend = RegistryBackend::Local;
        config.schema_registry.publish = vec![PublishedSchema {
            topic: "ProjectStatus".to_string(),
            path: file.path().to_path_buf(),
        }];

        let resolver = SchemaResolver::new(
            schema_registry(&config).unwrap(),
            config.schema_registry.wire_format,
        );
        publish_schemas(&resolver, &config.schema_registry.publish)
            .await
            .unwrap();

        resolver.preload(&["ProjectStatus".to_string()]).await.unwrap();
        assert!(resolver.is_cached("ProjectStatus"));
        assert!(resolver.preload(&["NewZip".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_schema_file_fails() {
        let resolver = SchemaResolver::new(
            Arc::new(StaticSchemaRegistry::new()),
            projectd_events::WireFormat::Json,
        );
        let published = [PublishedSchema {
            topic: "ProjectStatus".to_string(),
            path: "/nonexistent/status.avsc".into(),
        }];
        assert!(publish_schemas(&resolver, &published).await.is_err());
    }

    #[cfg(feature = "kafka")]
    #[tokio::test]
    async fn test_default_config_consumes_from_kafka() {
        let mut config = Config::default();
        config
            .bus
            .properties
            .insert("session.timeout.ms".to_string(), "6000".to_string());

        let connector = kafka_connector(&config).unwrap();
        assert!(connector.connect(&config.bus.group_id).await.is_ok());
    }

    #[cfg(not(feature = "kafka"))]
    #[test]
    fn test_kafka_requires_feature() {
        assert!(kafka_connector(&Config::default()).is_err());
    }
}
