//! Core domain models for the Qwenpool gateway.
//!
//! This module contains all shared data structures used across the workspace.

mod account;
mod config;
mod proxy;
mod token;

// Re-export all models
pub use account::{AccountKind, AccountRecord};
pub use config::{
    GatewayConfig, OAuthConfig, ProbeConfig, SessionCookies, UpstreamConfig,
    DEFAULT_CHAT_TIMEOUT_SECS, DEFAULT_PROBE_TIMEOUT_SECS,
};
pub use proxy::{ProxyRecord, ProxyStatus};
pub use token::IssuedToken;
