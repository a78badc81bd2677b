//! Outbound HTTP plumbing shared by probes, OAuth calls and dispatch.
//!
//! Clients carry no overall timeout; each call class sets its own per
//! request from `GatewayConfig` (probe, chat, OAuth).

mod client_cache;

pub use client_cache::ClientCache;
