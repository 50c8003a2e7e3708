//! Error types for nova-data
//!
//! Provides standardized error handling across the provider layer. Store and
//! provider contracts are best-effort and report failure through `bool` or
//! `Option`; this enum covers the operations that can genuinely fail.

use thiserror::Error;

/// Errors that can occur in the data layer
#[derive(Debug, Error)]
pub enum DataError {
    /// Persistent store errors
    #[error("Store error: {0}")]
    Store(String),

    /// The handler was created outside of a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// The bookkeeping executor has already shut down
    #[error("Provider executor is closed")]
    ExecutorClosed,

    /// The executor worker task panicked or was cancelled
    #[error("Provider executor failed: {0}")]
    ExecutorFailed(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("Config serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON errors from the store
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for data layer operations
pub type DataResult<T> = Result<T, DataError>;
