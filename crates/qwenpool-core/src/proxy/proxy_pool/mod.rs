//! Proxy pool: proxy records, their health state machine, and the
//! account bindings that point at them.
//!
//! All state sits behind one mutex and is only reachable through
//! invariant-preserving operations. Probes run with the lock released, so
//! a slow proxy only stalls the account currently resolving through it.
//! Every status change and binding change is mirrored to the persistence
//! writer while still under the lock, so the store sees them in order.

mod allocator;
mod probe;
mod rebalance;
mod state;

pub use allocator::AllocationTier;
pub use probe::{HttpProxyProber, ProxyProber};
pub use rebalance::{ReassignReason, ReassignmentMap};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::modules::persistence::{BindingMap, PersistenceWriter, ProxyStatusMap};
use crate::proxy::upstream::ClientCache;
use crate::utils::http::redact_proxy_url;
use qwenpool_types::models::{ProxyRecord, ProxyStatus};
use state::PoolState;

pub struct ProxyPool {
    state: Mutex<PoolState>,
    prober: Arc<dyn ProxyProber>,
    writer: PersistenceWriter,
    clients: Arc<ClientCache>,
}

impl ProxyPool {
    /// Empty pool.
    pub fn new(
        prober: Arc<dyn ProxyProber>,
        writer: PersistenceWriter,
        clients: Arc<ClientCache>,
    ) -> Self {
        Self::restore(ProxyStatusMap::new(), BindingMap::new(), prober, writer, clients)
    }

    /// Pool rebuilt from persisted statuses and bindings. Bindings to
    /// unknown proxies are held aside until the next rebalance.
    pub fn restore(
        statuses: ProxyStatusMap,
        bindings: BindingMap,
        prober: Arc<dyn ProxyProber>,
        writer: PersistenceWriter,
        clients: Arc<ClientCache>,
    ) -> Self {
        let state = PoolState::restore(statuses, bindings);
        tracing::info!(
            proxies = state.records().count(),
            bindings = state.bindings().len(),
            "Proxy pool restored"
        );
        Self { state: Mutex::new(state), prober, writer, clients }
    }

    /// Insert a proxy as `untested`. `false` if it is already known.
    pub async fn add_proxy(&self, url: &str) -> bool {
        let mut state = self.state.lock().await;
        if !state.insert_proxy(url) {
            return false;
        }
        self.writer.save_proxy_statuses(state.status_snapshot());
        tracing::info!(proxy = %redact_proxy_url(url), "Proxy added");
        true
    }

    /// Remove a proxy after unbinding every account that used it.
    pub async fn remove_proxy(&self, url: &str) -> bool {
        let unbound = {
            let mut state = self.state.lock().await;
            let Some(unbound) = state.remove_proxy(url) else {
                return false;
            };
            for email in &unbound {
                self.writer.save_proxy_binding(email, None);
            }
            self.writer.save_proxy_statuses(state.status_snapshot());
            unbound
        };

        self.clients.evict(url).await;
        tracing::info!(
            proxy = %redact_proxy_url(url),
            unbound = unbound.len(),
            "Proxy removed"
        );
        true
    }

    /// Force a proxy to `failed`, e.g. after a transport error through it.
    pub async fn mark_failed(&self, url: &str) -> bool {
        self.set_status(url, ProxyStatus::Failed).await
    }

    async fn set_status(&self, url: &str, status: ProxyStatus) -> bool {
        let mut state = self.state.lock().await;
        let changed = state.transition(url, status);
        if changed {
            self.writer.save_proxy_statuses(state.status_snapshot());
        }
        changed
    }

    /// Probe one proxy now and record the result. `None` if unknown.
    pub async fn check_proxy(&self, url: &str) -> Option<ProxyStatus> {
        if !self.state.lock().await.contains(url) {
            return None;
        }
        let ok = self.prober.probe(url).await;
        self.record_probe(url, ok).await;
        Some(ProxyStatus::from_probe(ok))
    }

    /// Probe every proxy, one after another.
    pub async fn check_all(&self) -> Vec<(String, ProxyStatus)> {
        let urls: Vec<String> = self.state.lock().await.records().map(|r| r.url.clone()).collect();
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            if let Some(status) = self.check_proxy(&url).await {
                results.push((url, status));
            }
        }
        results
    }

    /// Apply a probe outcome through the state machine and persist it.
    async fn record_probe(&self, url: &str, ok: bool) {
        self.set_status(url, ProxyStatus::from_probe(ok)).await;
    }

    /// Operator reload: add newly declared proxies, then reset every status
    /// to `untested`. Existing bindings are kept. Returns how many were new.
    pub async fn reload(&self, urls: &[String]) -> usize {
        let mut state = self.state.lock().await;
        let added = urls.iter().filter(|url| state.insert_proxy(url)).count();
        state.reset_statuses();
        self.writer.save_proxy_statuses(state.status_snapshot());
        tracing::info!(added, total = state.records().count(), "Proxies reloaded, statuses reset");
        added
    }

    /// Current binding for `email`, without probing.
    pub async fn binding_for(&self, email: &str) -> Option<String> {
        self.state.lock().await.binding(email).cloned()
    }

    /// Clear the binding for `email` (account removal). Returns the proxy it
    /// was bound to.
    pub async fn unbind(&self, email: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        let orphan = state.forget_orphan(email);
        let previous = state.unbind(email);
        if previous.is_some() || orphan {
            self.writer.save_proxy_binding(email, None);
        }
        previous
    }

    pub async fn status_of(&self, url: &str) -> Option<ProxyStatus> {
        self.state.lock().await.get(url).map(|r| r.status)
    }

    /// Copy of every proxy record, ordered by url.
    pub async fn snapshot(&self) -> Vec<ProxyRecord> {
        self.state.lock().await.records().cloned().collect()
    }

    pub async fn bindings(&self) -> HashMap<String, String> {
        self.state.lock().await.bindings().clone()
    }

    /// Check the bidirectional binding invariant.
    pub async fn check_invariants(&self) -> Result<(), String> {
        self.state.lock().await.check_invariants()
    }
}

#[cfg(test)]
mod tests;
