//! Error types for the feature access engine

use crate::types::{AccessLevel, RuleId};
use std::time::Duration;
use thiserror::Error;

/// Feature access errors
#[derive(Debug, Error)]
pub enum AccessError {
    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Feature not known to the cache or the store
    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    /// Rule not found
    #[error("Access rule not found: {0}")]
    RuleNotFound(RuleId),

    /// Actor lacks the level required for an administrative operation
    #[error("Forbidden: {required} access required on feature '{feature}'")]
    Forbidden {
        feature: String,
        required: AccessLevel,
    },

    /// Directory service error
    #[error("Directory error: {0}")]
    Directory(String),

    /// Directory call exceeded its time bound
    #[error("Directory call timed out after {0:?}")]
    DirectoryTimeout(Duration),

    /// Persistence error
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for feature access operations
pub type Result<T> = std::result::Result<T, AccessError>;
