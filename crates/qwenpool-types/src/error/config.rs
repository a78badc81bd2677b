//! Configuration-related errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while reading configuration or declaration files.
///
/// A malformed declaration never aborts a load: the offending entry is
/// logged and skipped.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ConfigError {
    /// Config file parse error (JSON)
    #[error("Config parse error: {message}")]
    ParseError {
        /// Description of the parse failure
        message: String,
    },

    /// Config validation error (invalid values)
    #[error("Config validation error for {field}: {message}")]
    ValidationError {
        /// Name of the field that failed validation
        field: String,
        /// Description of the validation failure
        message: String,
    },

    /// Config write error (permission denied, disk full, etc)
    #[error("Config write error: {message}")]
    WriteError {
        /// Description of the write failure
        message: String,
    },

    /// Proxy declaration could not be parsed
    #[error("Invalid proxy declaration on line {line}: {message}")]
    InvalidProxy {
        /// 1-based line number in the declaration source (0 when not from a file)
        line: usize,
        /// Description of the problem
        message: String,
    },

    /// Account declaration could not be parsed
    #[error("Invalid account declaration on line {line}: {message}")]
    InvalidAccount {
        /// 1-based line number in the declaration source
        line: usize,
        /// Description of the problem
        message: String,
    },
}

impl ConfigError {
    /// Create a parse error from a serde_json error.
    pub fn from_json_error(e: &serde_json::Error) -> Self {
        Self::ParseError { message: e.to_string() }
    }

    /// Create a write error from an IO error.
    pub fn from_io_error(e: &std::io::Error) -> Self {
        Self::WriteError { message: e.to_string() }
    }

    /// Proxy declaration error that did not come from a file line.
    pub fn invalid_proxy(message: impl Into<String>) -> Self {
        Self::InvalidProxy { line: 0, message: message.into() }
    }
}
