//! Error types for the netcheck core library

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetcheckError {
    #[error("Failed to create HTTP client: {0}")]
    HttpClient(String),

    #[error("Network is offline - run a connectivity check first")]
    Offline,

    #[error("All connections failed: {0}")]
    AllConnectionsFailed(String),

    #[error("Test stopped before any data was transferred")]
    NoData,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NetcheckError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_display_offline() {
        let err = NetcheckError::Offline;
        assert_eq!(
            err.to_string(),
            "Network is offline - run a connectivity check first"
        );
    }

    #[test]
    fn test_display_all_connections_failed() {
        let err = NetcheckError::AllConnectionsFailed("4 of 4 connections failed".to_string());
        assert_eq!(
            err.to_string(),
            "All connections failed: 4 of 4 connections failed"
        );
    }

    #[test]
    fn test_display_invalid_config() {
        let err = NetcheckError::InvalidConfig("connections must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: connections must be at least 1"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: NetcheckError = io_err.into();
        match err {
            NetcheckError::Io(ref e) => assert_eq!(e.kind(), io::ErrorKind::PermissionDenied),
            _ => panic!("Expected NetcheckError::Io variant"),
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err: NetcheckError = json_err.into();
        assert!(matches!(err, NetcheckError::Json(_)));
        assert!(err.to_string().starts_with("JSON error:"));
    }
}
