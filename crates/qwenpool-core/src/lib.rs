//! # Qwenpool Core
//!
//! Gateway logic for multiplexing upstream chat accounts over a pool of
//! SOCKS5 egress proxies.
//!
//! ## Layout
//!
//! ```text
//! qwenpool-core/src/
//! ├── modules/
//! │   ├── config.rs        # config.json loading, env overrides, validation
//! │   ├── declarations.rs  # proxies.txt / accounts.txt parsing
//! │   ├── logger.rs        # tracing subscriber setup
//! │   ├── oauth.rs         # device flow (PKCE), refresh, web sign-in
//! │   └── persistence/     # storage contract, JSON + memory backends, write-behind queue
//! ├── proxy/
//! │   ├── proxy_pool/      # proxy state machine, binding allocator, rebalance
//! │   ├── account_registry.rs
//! │   ├── dispatcher/      # session + completion calls, failure classification
//! │   ├── upstream/        # per-proxy reqwest client cache
//! │   └── context.rs       # GatewayContext bootstrap
//! └── utils/
//! ```

#![allow(
    clippy::significant_drop_tightening,
    reason = "Mutex guards in async code require careful lifetime management"
)]
#![allow(clippy::map_err_ignore, reason = "Error context is provided in the replacement message")]
#![allow(
    clippy::redundant_else,
    reason = "Explicit else blocks improve readability in complex control flow"
)]
// Test-only lints: allow panic!, println!, etc. in test code
#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::unwrap_used,
        clippy::assertions_on_result_states
    )
)]

pub mod error;
pub mod modules;
pub mod proxy;
pub mod utils;

// Re-export commonly used types
pub use error::{AppError, AppResult};
pub use proxy::{
    AccountRegistry, ChatBody, ChatCompletion, ChatRequest, DispatchError, DispatchStage,
    Dispatcher, GatewayContext, ProxyPool,
};
