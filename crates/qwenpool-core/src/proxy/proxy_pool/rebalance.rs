//! Startup validation of restored bindings.

use std::collections::BTreeMap;
use std::fmt;

use super::ProxyPool;
use crate::utils::http::redact_proxy_url;
use qwenpool_types::models::ProxyStatus;

/// Why an account lost its binding during rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassignReason {
    /// Bound proxy was untested and failed its probe
    StaleBinding,
    /// Bound proxy is no longer in the pool
    ProxyRemoved,
    /// Proxy was shared while a spare existed
    DuplicateBinding,
}

impl fmt::Display for ReassignReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StaleBinding => "stale binding",
            Self::ProxyRemoved => "proxy removed",
            Self::DuplicateBinding => "duplicate binding",
        })
    }
}

/// Accounts to hand back to `assign_proxy`, with the reason.
pub type ReassignmentMap = BTreeMap<String, ReassignReason>;

impl ProxyPool {
    /// Validate restored bindings and break up avoidable sharing.
    ///
    /// 1. Bindings to an `untested` proxy are probed; a failed probe drops them.
    /// 2. Bindings to a proxy that no longer exists are dropped.
    /// 3. A proxy bound to several accounts keeps only its first account
    ///    (by email order) when a spare proxy existed at call time;
    ///    otherwise the sharing is kept and logged.
    ///
    /// The caller re-runs `assign_proxy` for every returned account.
    pub async fn validate_and_rebalance_bindings(&self) -> ReassignmentMap {
        let mut reassign = ReassignmentMap::new();

        let (spare_exists, untested_bound) = {
            let mut state = self.state.lock().await;
            for email in state.take_orphans() {
                self.writer.save_proxy_binding(&email, None);
                reassign.insert(email, ReassignReason::ProxyRemoved);
            }
            let spare_exists = state.records().any(|r| r.is_spare());
            let untested_bound: Vec<String> = state
                .records()
                .filter(|r| r.status == ProxyStatus::Untested && !r.is_unused())
                .map(|r| r.url.clone())
                .collect();
            (spare_exists, untested_bound)
        };

        for url in untested_bound {
            let ok = self.prober.probe(&url).await;

            let mut state = self.state.lock().await;
            if state.transition(&url, ProxyStatus::from_probe(ok)) {
                self.writer.save_proxy_statuses(state.status_snapshot());
            }
            if ok {
                continue;
            }
            let stale: Vec<String> =
                state.get(&url).map(|r| r.assigned_accounts.iter().cloned().collect()).unwrap_or_default();
            for email in stale {
                state.unbind(&email);
                self.writer.save_proxy_binding(&email, None);
                tracing::info!(email = %email, proxy = %redact_proxy_url(&url), "Stale binding dropped");
                reassign.insert(email, ReassignReason::StaleBinding);
            }
        }

        let mut state = self.state.lock().await;
        let shared: Vec<(String, Vec<String>)> = state
            .records()
            .filter(|r| r.load() > 1)
            .map(|r| (r.url.clone(), r.assigned_accounts.iter().cloned().collect()))
            .collect();

        for (url, accounts) in shared {
            if !spare_exists {
                tracing::warn!(
                    proxy = %redact_proxy_url(&url),
                    accounts = accounts.len(),
                    "Proxy stays shared: no spare proxy"
                );
                continue;
            }
            for email in accounts.into_iter().skip(1) {
                state.unbind(&email);
                self.writer.save_proxy_binding(&email, None);
                reassign.insert(email, ReassignReason::DuplicateBinding);
            }
        }

        if !reassign.is_empty() {
            tracing::info!(count = reassign.len(), "Bindings queued for reassignment");
        }
        reassign
    }
}
