//! Core error types for projectd domain values.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for domain validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid project identifier '{input}': {reason}")]
    InvalidIdentifier { input: String, reason: String },

    #[error("unknown project status: {0}")]
    UnknownStatus(String),
}

impl Error {
    /// Create an invalid identifier error.
    pub fn invalid_identifier(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown status error.
    pub fn unknown_status(status: impl Into<String>) -> Self {
        Self::UnknownStatus(status.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_identifier_display() {
        let err = Error::invalid_identifier("a_b", "owner must not contain '_'");
        assert_eq!(
            err.to_string(),
            "invalid project identifier 'a_b': owner must not contain '_'"
        );
    }

    #[test]
    fn test_unknown_status_display() {
        let err = Error::unknown_status("PAUSED");
        assert!(err.to_string().contains("PAUSED"));
    }
}
