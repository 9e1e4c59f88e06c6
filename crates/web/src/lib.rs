//! projectd web server
//!
//! HTTP query/mutation API over the project repository plus a server-sent
//! events stream of live project updates, with tower middleware for CORS and
//! request tracing.

use axum::{Router, http::Method};
use projectd_events::ShutdownListener;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

pub mod error;
pub mod routes;
pub mod state;

pub use error::{AppError, ErrorResponse};
pub use state::AppState;

/// Web server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:50051")
    pub bind_address: String,
    /// Allowed CORS origin; `*` allows any origin
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:50051".to_string(),
            cors_origin: "*".to_string(),
        }
    }
}

/// Create a new router with middleware.
///
/// # Errors
///
/// Returns an error if the configured CORS origin is not a valid header value.
pub fn create_router(state: AppState, config: &ServerConfig) -> Result<Router, Error> {
    info!(cors_origin = %config.cors_origin, "creating router");

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any);
    let cors = if config.cors_origin == "*" {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(config.cors_origin.parse::<http::HeaderValue>()?)
    };

    let router = routes::create_routes().with_state(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    );

    Ok(router)
}

/// Serve `router` on `listener` until `shutdown` fires, then drain in-flight
/// requests.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn run_server(
    listener: TcpListener,
    router: Router,
    mut shutdown: ShutdownListener,
) -> Result<(), Error> {
    let addr = listener.local_addr()?;
    info!(%addr, "projectd HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Web server errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
