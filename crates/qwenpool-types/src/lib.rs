//! # Qwenpool Types
//!
//! Core types, models, and error definitions for the Qwenpool gateway.
//!
//! This crate provides the foundational type system for the workspace:
//!
//! - **`error`** - Typed error hierarchy for accounts, proxies, and configuration
//! - **`models`** - Domain models (proxy records, account records, issued tokens, config)
//!
//! ## Architecture Role
//!
//! `qwenpool-types` sits at the bottom of the dependency graph:
//!
//! ```text
//!                qwenpool-types (this crate)
//!                        │
//!                        ▼
//!                  qwenpool-core
//!                        │
//!                        ▼
//!                 qwenpool-server
//! ```
//!
//! Nothing in this crate performs I/O. All types are:
//! - **Serializable** via serde for persistence
//! - **Clone** for cheap sharing across async boundaries
//! - **PartialEq** for testing and comparison

pub mod error;
pub mod models;

// Re-export error types for convenience
pub use error::{AccountError, ConfigError, ProxyError};

// Re-export core model types
pub use models::{
    AccountKind, AccountRecord, GatewayConfig, IssuedToken, ProxyRecord, ProxyStatus,
    SessionCookies,
};
