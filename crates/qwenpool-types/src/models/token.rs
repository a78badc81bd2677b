//! Token data model.

use serde::{Deserialize, Serialize};

/// Token pair issued by a device-flow poll, refresh exchange, or sign-in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedToken {
    /// Bearer credential for upstream calls
    pub access_token: String,
    /// Present when the issuer rotated or created a refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry, Unix milliseconds
    pub expiry: i64,
}

impl IssuedToken {
    /// Build from an `expires_in` (seconds) relative to `now_ms`.
    pub fn from_expires_in(
        access_token: String,
        refresh_token: Option<String>,
        expires_in: i64,
        now_ms: i64,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expiry: now_ms.saturating_add(expires_in.saturating_mul(1000)),
        }
    }
}
