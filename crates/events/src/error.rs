//! Error types for the events crate.
//!
//! One enum per concern so the consumer can decide per error whether a
//! message is skipped, retried, or ends the session.

use thiserror::Error;

/// Schema resolution failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// Registry unreachable or answered with a non-success status.
    #[error("schema for '{subject}' unavailable: {reason}")]
    Unavailable { subject: String, reason: String },

    /// Schema text failed to compile.
    #[error("schema for '{subject}' invalid: {reason}")]
    Invalid { subject: String, reason: String },
}

impl SchemaError {
    /// Create an unavailable error.
    pub fn unavailable(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid schema error.
    pub fn invalid(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}

/// Failures turning a payload into an update command.
///
/// Every variant marks a poison message: it is acknowledged and skipped,
/// never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' has wrong type: expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("unknown project status '{0}'")]
    UnknownStatus(String),

    #[error("invalid project identifier: {0}")]
    InvalidIdentifier(String),
}

impl From<projectd_core::Error> for DecodeError {
    fn from(err: projectd_core::Error) -> Self {
        match err {
            projectd_core::Error::UnknownStatus(status) => Self::UnknownStatus(status),
            other @ projectd_core::Error::InvalidIdentifier { .. } => {
                Self::InvalidIdentifier(other.to_string())
            }
        }
    }
}

/// Message bus failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// Subscription torn down; no further messages will arrive.
    #[error("bus subscription closed")]
    Closed,

    #[error("bus transport error: {0}")]
    Transport(String),

    #[error("offset commit failed: {0}")]
    Commit(String),
}

/// Result type for bus operations.
pub type BusResult<T> = std::result::Result<T, BusError>;

/// Why a consumption session ended abnormally.
///
/// The supervisor observes this and restarts the session after a cool-down.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Bus(#[from] BusError),

    /// A session panicked; carries the panic payload.
    #[error("unexpected fault: {0}")]
    UnexpectedFault(String),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_map_to_decode_errors() {
        let status: DecodeError = projectd_core::Error::unknown_status("PAUSED").into();
        assert_eq!(status, DecodeError::UnknownStatus("PAUSED".to_string()));

        let id: DecodeError = projectd_core::Error::invalid_identifier("x", "bad").into();
        assert!(matches!(id, DecodeError::InvalidIdentifier(_)));
    }

    #[test]
    fn test_pipeline_error_is_transparent() {
        let err: PipelineError = SchemaError::unavailable("NewZip-value", "503").into();
        assert_eq!(err.to_string(), "schema for 'NewZip-value' unavailable: 503");
    }
}
