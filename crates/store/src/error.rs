//! Persistence error types for the project repository.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::fmt;

use thiserror::Error;

/// Errors that can occur during repository operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Failed to connect to the database
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// Query execution failed
    #[error("query failed: {reason}")]
    QueryFailed { reason: String },

    /// No project stored under the key
    #[error("project not found: '{key}'")]
    NotFound { key: String },

    /// A project is already stored under the key
    #[error("project already exists: '{key}'")]
    AlreadyExists { key: String },

    /// Serialization/deserialization error
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// Timeout waiting for operation
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Storage temporarily refusing work
    #[error("storage unavailable: {reason}")]
    Unavailable { reason: String },

    /// Schema definition failed
    #[error("schema error: {reason}")]
    Schema { reason: String },
}

impl StoreError {
    /// Create a connection failed error.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: reason.into(),
        }
    }

    /// Create a query failed error.
    pub fn query_failed(reason: impl Into<String>) -> Self {
        Self::QueryFailed {
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create an already exists error.
    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { key: key.into() }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(reason: impl Into<String>) -> Self {
        Self::Schema {
            reason: reason.into(),
        }
    }

    /// Check if error is retryable.
    ///
    /// Retryable errors must never be acknowledged on the bus.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::Unavailable { .. }
        )
    }

    /// Check if error means the project does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Helper to convert SurrealDB errors to `StoreError`.
///
/// `key` is attached to the already-exists variant. A missing project is
/// never inferred from message text: callers detect it from an empty result.
/// Missing tables, namespaces or databases are storage faults and map to
/// [`StoreError::Unavailable`].
pub fn from_surrealdb_error(err: impl fmt::Display, key: &str) -> StoreError {
    let msg = err.to_string();

    if msg.contains("timeout") || msg.contains("Timeout") {
        StoreError::timeout(0)
    } else if msg.contains("connection") || msg.contains("Connection") || msg.contains("connect") {
        StoreError::connection_failed(msg)
    } else if msg.contains("already exists")
        || msg.contains("already contains")
        || msg.contains("duplicate")
    {
        StoreError::already_exists(key)
    } else if msg.contains("not found") || msg.contains("does not exist") {
        StoreError::unavailable(msg)
    } else if msg.contains("deserializ") || msg.contains("serializ") {
        StoreError::serialization(msg)
    } else {
        StoreError::query_failed(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failed_is_retryable() {
        let err = StoreError::connection_failed("host unreachable");
        assert!(matches!(err, StoreError::ConnectionFailed { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_found_is_terminal() {
        let err = StoreError::not_found("bob_missing");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "project not found: 'bob_missing'");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::timeout(5000).is_retryable());
        assert!(StoreError::unavailable("maintenance").is_retryable());
        assert!(!StoreError::already_exists("alice_app1").is_retryable());
        assert!(!StoreError::query_failed("parse error").is_retryable());
        assert!(!StoreError::serialization("bad field").is_retryable());
    }

    #[test]
    fn test_from_surrealdb_error_timeout() {
        let err = from_surrealdb_error("operation timeout after 30s", "k");
        assert!(matches!(err, StoreError::Timeout { .. }));
    }

    #[test]
    fn test_from_surrealdb_error_connection() {
        let err = from_surrealdb_error("connection refused", "k");
        assert!(matches!(err, StoreError::ConnectionFailed { .. }));
    }

    #[test]
    fn test_from_surrealdb_error_duplicate_record() {
        let err = from_surrealdb_error(
            "Database record `project:alice_app1` already exists",
            "alice_app1",
        );
        assert_eq!(err, StoreError::already_exists("alice_app1"));
    }

    #[test]
    fn test_from_surrealdb_error_missing_table_is_retryable() {
        let err = from_surrealdb_error("The table 'project' does not exist", "alice_app1");
        assert!(!err.is_not_found());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_surrealdb_error_missing_namespace_is_retryable() {
        let err = from_surrealdb_error("The namespace 'projectd' was not found", "alice_app1");
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }

    #[test]
    fn test_from_surrealdb_error_generic() {
        let err = from_surrealdb_error("some random error", "k");
        assert!(matches!(err, StoreError::QueryFailed { .. }));
    }
}
