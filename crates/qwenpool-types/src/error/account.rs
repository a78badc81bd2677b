//! Account and credential errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during account and credential operations.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum AccountError {
    /// Account with given email not found
    #[error("Account not found: {email}")]
    NotFound {
        /// Identity of the missing account
        email: String,
    },

    /// Account already registered
    #[error("Account already exists: {email}")]
    AlreadyExists {
        /// Identity of the duplicate account
        email: String,
    },

    /// No registered account can currently produce an access token
    #[error("No usable access token: {reason}")]
    TokenUnavailable {
        /// Why every candidate was rejected
        reason: String,
    },

    /// Refresh exchange or password sign-in failed
    #[error("Failed to renew credentials for {email}: {message}")]
    RefreshFailed {
        /// Identity of the account
        email: String,
        /// Details about the renewal failure
        message: String,
    },

    /// A CLI-style account has no refresh token to exchange
    #[error("Account {email} has no refresh token")]
    MissingRefreshToken {
        /// Identity of the account
        email: String,
    },

    /// Device authorization flow failed at some stage
    #[error("Device flow failed during {stage}: {message}")]
    DeviceFlowFailed {
        /// Stage name (`device_code`, `authorize`, `poll`)
        stage: String,
        /// Details about the failure
        message: String,
    },

    /// Polling ran out of attempts without a token
    #[error("Device flow timed out after {attempts} poll attempts")]
    DeviceFlowTimedOut {
        /// Number of poll attempts made
        attempts: u32,
    },

    /// Account was marked unusable after a credential failure
    #[error("Account {email} is unusable: {reason}")]
    Unusable {
        /// Identity of the account
        email: String,
        /// Reason recorded when it was marked
        reason: String,
    },
}

impl AccountError {
    /// Check if this error should mark the account unusable until re-authentication.
    pub const fn should_mark_unusable(&self) -> bool {
        matches!(self, Self::RefreshFailed { .. } | Self::MissingRefreshToken { .. })
    }

    /// Check if this is a device-flow failure.
    pub const fn is_device_flow(&self) -> bool {
        matches!(self, Self::DeviceFlowFailed { .. } | Self::DeviceFlowTimedOut { .. })
    }
}
