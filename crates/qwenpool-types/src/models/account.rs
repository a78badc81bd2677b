//! Account record model.

use serde::{Deserialize, Serialize};

use super::token::IssuedToken;

/// How an account renews its access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// Browser-style account: `secret` is the password, renewal is a sign-in
    #[default]
    Web,
    /// CLI-style account: `secret` is the OAuth refresh token
    Cli,
}

impl AccountKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Cli => "cli",
        }
    }
}

/// Upstream credential identity managed by the account registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Identity, unique across the registry
    pub email: String,
    /// Password (web) or refresh token (cli)
    pub secret: String,
    #[serde(default)]
    pub kind: AccountKind,
    /// Current bearer token, if one was ever issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Access token expiry, Unix milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<i64>,
    /// Set when renewal failed; cleared by a secret rotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unusable_reason: Option<String>,
}

impl AccountRecord {
    pub fn new(email: impl Into<String>, secret: impl Into<String>, kind: AccountKind) -> Self {
        Self {
            email: email.into(),
            secret: secret.into(),
            kind,
            access_token: None,
            token_expiry: None,
            unusable_reason: None,
        }
    }

    pub fn web(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(email, password, AccountKind::Web)
    }

    pub fn cli(email: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self::new(email, refresh_token, AccountKind::Cli)
    }

    pub fn is_usable(&self) -> bool {
        self.unusable_reason.is_none()
    }

    /// Refresh token for CLI accounts; `None` for web accounts or an empty secret.
    pub fn refresh_token(&self) -> Option<&str> {
        match self.kind {
            AccountKind::Cli if !self.secret.trim().is_empty() => Some(self.secret.as_str()),
            _ => None,
        }
    }

    /// Whether the access token is present and still valid `margin_ms` from `now_ms`.
    pub fn has_valid_token(&self, now_ms: i64, margin_ms: i64) -> bool {
        match (&self.access_token, self.token_expiry) {
            (Some(token), Some(expiry)) if !token.is_empty() => {
                now_ms.saturating_add(margin_ms) < expiry
            },
            _ => false,
        }
    }

    /// Store a freshly issued token.
    ///
    /// For CLI accounts the refresh token is rotated only when the issuer
    /// returned a new one.
    pub fn apply_token(&mut self, token: &IssuedToken) {
        self.access_token = Some(token.access_token.clone());
        self.token_expiry = Some(token.expiry);
        if self.kind == AccountKind::Cli {
            if let Some(refresh) = token.refresh_token.as_ref().filter(|r| !r.is_empty()) {
                self.secret = refresh.clone();
            }
        }
        self.unusable_reason = None;
    }

    /// Replace the secret and forget any token derived from the old one.
    pub fn rotate_secret(&mut self, secret: impl Into<String>) {
        self.secret = secret.into();
        self.access_token = None;
        self.token_expiry = None;
        self.unusable_reason = None;
    }
}
