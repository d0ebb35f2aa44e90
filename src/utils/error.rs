//! Error types and handling
//!
//! Common error types used across the recorder.

use crate::recorder::state::RecorderState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Encoder failure: {0}")]
    EncoderFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("A session is already active (state: {0:?})")]
    AlreadyActive(RecorderState),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of a [`RecorderError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NotReady,
    InvalidTimestamp,
    EncoderFailure,
    Io,
    AlreadyActive,
    Serialization,
}

impl RecorderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecorderError::NotReady(_) => ErrorKind::NotReady,
            RecorderError::InvalidTimestamp(_) => ErrorKind::InvalidTimestamp,
            RecorderError::EncoderFailure(_) => ErrorKind::EncoderFailure,
            RecorderError::Io(_) => ErrorKind::Io,
            RecorderError::AlreadyActive(_) => ErrorKind::AlreadyActive,
            RecorderError::Serialization(_) => ErrorKind::Serialization,
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_cause() {
        let err = RecorderError::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only volume",
        ));

        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("read-only volume"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_already_active_names_state() {
        let err = RecorderError::AlreadyActive(RecorderState::Recording);
        assert_eq!(err.kind(), ErrorKind::AlreadyActive);
        assert!(err.to_string().contains("Recording"));
    }
}
