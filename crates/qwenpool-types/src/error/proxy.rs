//! Proxy pool errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the proxy pool and its per-proxy HTTP clients.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ProxyError {
    /// Client for the proxy could not be built or reached it
    #[error("Network failure via {proxy}: {message}")]
    Network {
        /// Redacted proxy url, or `direct`
        proxy: String,
        /// Underlying transport error text
        message: String,
    },

    /// No proxy could be bound for the account
    #[error("Proxy pool exhausted for {email}")]
    PoolExhausted {
        /// Account left unserved
        email: String,
    },

    /// Proxy url not present in the pool
    #[error("Unknown proxy: {proxy}")]
    UnknownProxy {
        /// Redacted proxy url
        proxy: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_proxy_display() {
        let err = ProxyError::UnknownProxy { proxy: "socks5://***@10.0.0.1:1080".to_string() };
        assert_eq!(err.to_string(), "Unknown proxy: socks5://***@10.0.0.1:1080");
    }
}
