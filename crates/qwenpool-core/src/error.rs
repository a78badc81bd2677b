//! Unified error types for Qwenpool Core.

use serde::Serialize;
use thiserror::Error;

use crate::modules::persistence::PersistenceError;
use qwenpool_types::error::{AccountError, ConfigError, ProxyError};

/// Main error type for all Qwenpool operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AppError {
    /// Network request failed (HTTP client).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// File system I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Durable store could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Credential or registry failure (not found, refresh failed, etc.).
    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    /// Proxy pool failure (unknown proxy, pool exhausted, transport error).
    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

/// Result type alias for Qwenpool operations.
pub type AppResult<T> = Result<T, AppError>;
