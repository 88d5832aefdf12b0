//! Domain error types
//!
//! Validation failures and invariant breaches that originate in the
//! domain layer, independent of any adapter.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid remote file identifier
    #[error("Invalid file id: {0}")]
    InvalidFileId(String),

    /// Invalid change-feed token
    #[error("Invalid change token: {0}")]
    InvalidChangeToken(String),

    /// A local path has no usable final segment
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    /// A local path could not be resolved against the tracked tree
    #[error("Path not tracked: {0}")]
    PathNotTracked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidFileId("".to_string());
        assert_eq!(err.to_string(), "Invalid file id: ");

        let err = DomainError::PathNotTracked("/tmp/x".to_string());
        assert_eq!(err.to_string(), "Path not tracked: /tmp/x");
    }

    #[test]
    fn test_error_equality() {
        let a = DomainError::InvalidFileName("a/b".to_string());
        let b = DomainError::InvalidFileName("a/b".to_string());
        assert_eq!(a, b);
    }
}
