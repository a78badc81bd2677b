//! One `reqwest::Client` per proxy url, built lazily and reused.

use reqwest::Client;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::utils::http::{create_client, create_client_with_proxy, redact_proxy_url};
use qwenpool_types::error::ProxyError;

pub struct ClientCache {
    user_agent: String,
    /// Direct (no-proxy) client
    direct_client: Client,
    /// Cached proxy clients keyed by proxy URL
    clients: RwLock<HashMap<String, Client>>,
}

impl ClientCache {
    pub fn new(user_agent: impl Into<String>) -> Result<Self, String> {
        let user_agent = user_agent.into();
        let direct_client = create_client(&user_agent)?;
        Ok(Self { user_agent, direct_client, clients: RwLock::new(HashMap::new()) })
    }

    /// Client for `proxy_url`, or the direct client when `None`.
    pub async fn client_for(&self, proxy_url: Option<&str>) -> Result<Client, ProxyError> {
        match proxy_url {
            Some(url) => self.get_or_create_client(url).await,
            None => Ok(self.direct_client.clone()),
        }
    }

    async fn get_or_create_client(&self, proxy_url: &str) -> Result<Client, ProxyError> {
        // Fast path: check read lock
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(proxy_url) {
                return Ok(client.clone());
            }
        }

        let mut clients = self.clients.write().await;
        // Double-check after acquiring write lock
        if let Some(client) = clients.get(proxy_url) {
            return Ok(client.clone());
        }

        let client = create_client_with_proxy(&self.user_agent, proxy_url).map_err(|message| {
            ProxyError::Network { proxy: redact_proxy_url(proxy_url), message }
        })?;
        tracing::debug!(proxy = %redact_proxy_url(proxy_url), "Created new proxy client");
        clients.insert(proxy_url.to_string(), client.clone());
        Ok(client)
    }

    /// Forget the cached client for a removed proxy.
    pub async fn evict(&self, proxy_url: &str) {
        if self.clients.write().await.remove(proxy_url).is_some() {
            tracing::debug!(proxy = %redact_proxy_url(proxy_url), "Evicted proxy client");
        }
    }

    #[cfg(test)]
    async fn cached_count(&self) -> usize {
        self.clients.read().await.len()
    }
}
