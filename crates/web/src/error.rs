//! Error handling with RFC 7807 Problem Details for JSON responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use projectd_store::StoreError;
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { key } => Self::NotFound(format!("project '{key}'")),
            StoreError::AlreadyExists { key } => {
                Self::Conflict(format!("project '{key}' already exists"))
            }
            other if other.is_retryable() => Self::ServiceUnavailable(other.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<projectd_core::Error> for AppError {
    fn from(err: projectd_core::Error) -> Self {
        Self::BadRequest(err.to_string())
    }
}

/// RFC 7807 Problem Details for HTTP APIs
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub problem_type: Option<String>,
    pub title: String,
    pub status: u16,
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            problem_type: None,
            title: title.into(),
            status: status.as_u16(),
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn from_error(err: &AppError) -> Self {
        let status = err.status_code();
        let title = status.canonical_reason().unwrap_or("Error");

        Self::new(status, title, err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let response = ErrorResponse::from_error(&self);
        (status, Json(response)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_status_codes() {
        let cases = [
            (StoreError::not_found("alice_app1"), StatusCode::NOT_FOUND),
            (StoreError::already_exists("alice_app1"), StatusCode::CONFLICT),
            (StoreError::timeout(500), StatusCode::SERVICE_UNAVAILABLE),
            (
                StoreError::connection_failed("refused"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                StoreError::serialization("bad row"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (store_error, expected) in cases {
            assert_eq!(AppError::from(store_error).status_code(), expected);
        }
    }

    #[test]
    fn test_invalid_identifier_is_bad_request() {
        let err = projectd_core::ProjectIdentifier::new("al_ice", "app").unwrap_err();
        assert_eq!(AppError::from(err).status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_problem_details_shape() {
        let body = ErrorResponse::from_error(&AppError::NotFound("project 'x_y'".into()));
        assert_eq!(body.status, 404);
        assert_eq!(body.title, "Not Found");
        assert!(body.detail.contains("x_y"));
    }
}
