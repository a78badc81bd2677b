//! Proxy health probes.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::proxy::upstream::ClientCache;
use crate::utils::http::redact_proxy_url;
use qwenpool_types::models::ProbeConfig;

/// Decides whether a proxy is usable right now.
#[async_trait]
pub trait ProxyProber: Send + Sync {
    /// `true` only for a fully successful probe; any failure is `false`.
    async fn probe(&self, proxy_url: &str) -> bool;
}

/// One bounded GET through the proxy to a cheap endpoint; only the exact
/// expected status counts as success.
pub struct HttpProxyProber {
    clients: Arc<ClientCache>,
    url: String,
    expected_status: u16,
    timeout: Duration,
}

impl HttpProxyProber {
    pub fn new(clients: Arc<ClientCache>, config: &ProbeConfig) -> Self {
        Self {
            clients,
            url: config.url.clone(),
            expected_status: config.expected_status,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl ProxyProber for HttpProxyProber {
    async fn probe(&self, proxy_url: &str) -> bool {
        let proxy = redact_proxy_url(proxy_url);
        let client = match self.clients.client_for(Some(proxy_url)).await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(proxy = %proxy, error = %e, "Probe skipped: client unavailable");
                return false;
            },
        };

        match client.get(&self.url).timeout(self.timeout).send().await {
            Ok(response) if response.status().as_u16() == self.expected_status => {
                tracing::debug!(proxy = %proxy, "Probe succeeded");
                true
            },
            Ok(response) => {
                tracing::info!(
                    proxy = %proxy,
                    status = response.status().as_u16(),
                    expected = self.expected_status,
                    "Probe failed: unexpected status"
                );
                false
            },
            Err(e) => {
                tracing::info!(proxy = %proxy, error = %e, "Probe failed: transport error");
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_through_dead_proxy_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let clients = Arc::new(ClientCache::new("qwenpool-test").unwrap());
        let config = ProbeConfig {
            url: "http://127.0.0.1:9/generate_204".to_string(),
            expected_status: 204,
            timeout_secs: 2,
        };
        let prober = HttpProxyProber::new(clients, &config);

        assert!(!prober.probe(&format!("socks5://127.0.0.1:{}", port)).await);
    }
}
