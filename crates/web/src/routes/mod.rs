//! REST API routes
//!
//! ## Route Structure
//!
//! - `GET /health` - Health check endpoint
//! - `POST /api/projects/{owner}/{name}` - Initialise a project
//! - `GET /api/projects/{owner}/{name}` - Fetch a project
//! - `GET /api/projects/{owner}` - List an owner's projects
//! - `PUT /api/projects/{owner}/{name}/data` - Replace project data
//! - `GET /api/projects/{owner}/{name}/status` - Project status
//! - `GET /api/watch/{owner}` - Server-sent stream of an owner's updates

use axum::{
    Router,
    routing::{get, put},
};

use crate::state::AppState;

pub mod health;
pub mod projects;
pub mod watch;

/// Assemble every route; state is attached by the caller.
pub fn create_routes() -> Router<AppState> {
    let api_routes = Router::new()
        .route(
            "/projects/{owner}/{name}",
            get(projects::get_project).post(projects::init_project),
        )
        .route("/projects/{owner}", get(projects::list_projects))
        .route("/projects/{owner}/{name}/data", put(projects::update_data))
        .route("/projects/{owner}/{name}/status", get(projects::get_status))
        .route("/watch/{owner}", get(watch::watch_owner));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api_routes)
}
