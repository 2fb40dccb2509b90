// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/envwatch

//! Error types shared by the sources, the model, the session and storage

/// Errors raised by the monitoring core
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Too few readings to fit the model
    #[error("insufficient data: at least {required} readings required, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// The session has no series or model yet
    #[error("session not initialized")]
    NotInitialized,

    /// The reading source could not produce a reading (network or parse failure)
    #[error("data source unavailable: {0}")]
    DataSourceUnavailable(String),

    /// A reading with the same timestamp is already stored
    #[error("duplicate timestamp: {0}")]
    DuplicateTimestamp(String),

    /// A parameter is outside its valid range
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl MonitorError {
    /// Whether the caller can retry, skip, or fall back and carry on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MonitorError::DataSourceUnavailable(_) | MonitorError::DuplicateTimestamp(_)
        )
    }
}

/// Result alias for the monitoring core
pub type Result<T> = std::result::Result<T, MonitorError>;
