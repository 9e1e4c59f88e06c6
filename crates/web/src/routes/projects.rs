//! Project endpoints
//!
//! - `POST /api/projects/{owner}/{name}` - Initialise a project
//! - `GET /api/projects/{owner}/{name}` - Fetch one project
//! - `GET /api/projects/{owner}?page=&limit=` - List an owner's projects
//! - `PUT /api/projects/{owner}/{name}/data` - Replace the opaque data object
//! - `GET /api/projects/{owner}/{name}/status` - Current status only

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use projectd_core::{Project, ProjectIdentifier, ProjectStatus};
use projectd_store::Page;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Pagination query. Values are taken as text so that garbage falls back to
/// the defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    page: Option<String>,
    limit: Option<String>,
}

impl PageQuery {
    fn to_page(&self) -> Page {
        let parse = |value: &Option<String>| value.as_deref().and_then(|v| v.trim().parse().ok());
        Page::new(parse(&self.page), parse(&self.limit))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: ProjectStatus,
}

/// POST /api/projects/{owner}/{name}
pub async fn init_project(
    Path((owner, name)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Project>)> {
    let id = ProjectIdentifier::new(owner, name)?;
    let project = state.repository.init(&id).await?;
    let delivered = state.broadcaster.publish(&project);
    debug!(project = %id, delivered, "project initialised");

    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /api/projects/{owner}/{name}
pub async fn get_project(
    Path((owner, name)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<Project>> {
    let id = ProjectIdentifier::new(owner, name)?;
    Ok(Json(state.repository.get(&id).await?))
}

/// GET /api/projects/{owner}
pub async fn list_projects(
    Path(owner): Path<String>,
    Query(query): Query<PageQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Project>>> {
    let page = query.to_page();
    Ok(Json(state.repository.list(&owner, page).await?))
}

/// PUT /api/projects/{owner}/{name}/data
pub async fn update_data(
    Path((owner, name)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(data): Json<serde_json::Value>,
) -> Result<Json<Project>> {
    let id = ProjectIdentifier::new(owner, name)?;
    if !data.is_object() {
        return Err(AppError::BadRequest(
            "project data must be a JSON object".to_string(),
        ));
    }

    let project = state.repository.update_data(&id, data).await?;
    let delivered = state.broadcaster.publish(&project);
    debug!(project = %id, delivered, "project data replaced");

    Ok(Json(project))
}

/// GET /api/projects/{owner}/{name}/status
pub async fn get_status(
    Path((owner, name)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>> {
    let id = ProjectIdentifier::new(owner, name)?;
    let project = state.repository.get(&id).await?;
    Ok(Json(StatusResponse {
        status: project.status,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: Option<&str>, limit: Option<&str>) -> PageQuery {
        PageQuery {
            page: page.map(str::to_string),
            limit: limit.map(str::to_string),
        }
    }

    #[test]
    fn test_page_query_parses_numbers() {
        let page = query(Some("3"), Some("25")).to_page();
        assert_eq!(page.number(), 3);
        assert_eq!(page.limit(), 25);
    }

    #[test]
    fn test_page_query_garbage_falls_back() {
        let page = query(Some("abc"), Some("-4")).to_page();
        assert_eq!(page, Page::default());

        let page = query(None, Some("0")).to_page();
        assert_eq!(page, Page::default());
    }
}
