//! Unified error handling for the run-tracker library.
//!
//! Tracking itself never fails: short paths measure zero, fixes outside a
//! tracking interval are dropped and a missing location permission only
//! suppresses the subscription. Errors come from the storage layer and from
//! configuration input, and are always propagated to the caller.

use thiserror::Error;

/// Unified error type for run-tracker operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// SQLite storage error
    #[cfg(feature = "persistence")]
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// JSON encoding/decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// User settings rejected by validation
    #[error("Invalid settings: {message}")]
    InvalidSettings { message: String },

    /// A lock guarding shared state was poisoned by a panicking writer
    #[error("Lock poisoned: {what}")]
    LockPoisoned { what: String },

    /// Global tracker used before initialization
    #[error("Tracker not initialized")]
    NotInitialized,

    /// Async runtime could not be created or used
    #[error("Runtime error: {message}")]
    Runtime { message: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TrackerError {
    pub(crate) fn lock_poisoned(what: &str) -> Self {
        TrackerError::LockPoisoned {
            what: what.to_string(),
        }
    }

    pub(crate) fn invalid_settings(message: impl Into<String>) -> Self {
        TrackerError::InvalidSettings {
            message: message.into(),
        }
    }
}

/// Result type alias for run-tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackerError::invalid_settings("weight must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid settings: weight must be positive"
        );

        let err = TrackerError::lock_poisoned("run store");
        assert!(err.to_string().contains("run store"));
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_storage_error_conversion() {
        let err: TrackerError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, TrackerError::Storage(_)));
        assert!(err.to_string().starts_with("Storage error"));
    }
}
