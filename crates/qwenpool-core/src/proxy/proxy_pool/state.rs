//! Pool state guarded by the pool mutex.
//!
//! Proxy records and the binding map live side by side so that every
//! mutation updates both in one step. Nothing outside this module touches
//! the underlying collections.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::modules::persistence::{BindingMap, ProxyStatusMap};
use crate::utils::http::redact_proxy_url;
use qwenpool_types::models::{ProxyRecord, ProxyStatus};

#[derive(Debug, Default)]
pub(super) struct PoolState {
    proxies: BTreeMap<String, ProxyRecord>,
    /// `email -> proxy url`; every target is a key of `proxies`
    bindings: HashMap<String, String>,
    /// Restored bindings whose proxy is gone; drained by rebalance
    orphans: BTreeSet<String>,
}

impl PoolState {
    /// Rebuild from persisted statuses and bindings.
    pub(super) fn restore(statuses: ProxyStatusMap, bindings: BindingMap) -> Self {
        let mut state = Self::default();
        for (url, status) in statuses {
            state.proxies.insert(url.clone(), ProxyRecord::with_status(url, status));
        }
        for (email, url) in bindings {
            if state.proxies.contains_key(&url) {
                state.bind(&email, &url);
            } else {
                tracing::warn!(
                    email = %email,
                    proxy = %redact_proxy_url(&url),
                    "Restored binding points at an unknown proxy"
                );
                state.orphans.insert(email);
            }
        }
        state
    }

    pub(super) fn contains(&self, url: &str) -> bool {
        self.proxies.contains_key(url)
    }

    pub(super) fn get(&self, url: &str) -> Option<&ProxyRecord> {
        self.proxies.get(url)
    }

    pub(super) fn records(&self) -> impl Iterator<Item = &ProxyRecord> {
        self.proxies.values()
    }

    pub(super) fn binding(&self, email: &str) -> Option<&String> {
        self.bindings.get(email)
    }

    pub(super) fn bindings(&self) -> &HashMap<String, String> {
        &self.bindings
    }

    /// Insert as `untested`; `false` if already present.
    pub(super) fn insert_proxy(&mut self, url: &str) -> bool {
        if self.proxies.contains_key(url) {
            return false;
        }
        self.proxies.insert(url.to_string(), ProxyRecord::new(url));
        true
    }

    /// Delete a proxy, unbinding every account first. Returns the unbound
    /// emails, or `None` if the proxy was unknown.
    pub(super) fn remove_proxy(&mut self, url: &str) -> Option<Vec<String>> {
        let assigned: Vec<String> = self.proxies.get(url)?.assigned_accounts.iter().cloned().collect();
        for email in &assigned {
            self.bindings.remove(email);
        }
        self.proxies.remove(url);
        Some(assigned)
    }

    /// The single place a proxy status changes.
    ///
    /// Returns `true` when the stored status actually changed. Transitions
    /// the state machine forbids are logged and ignored.
    pub(super) fn transition(&mut self, url: &str, next: ProxyStatus) -> bool {
        let Some(record) = self.proxies.get_mut(url) else {
            return false;
        };
        let current = record.status;
        if current == next {
            return false;
        }
        if !current.can_transition_to(next) {
            tracing::warn!(
                proxy = %redact_proxy_url(url),
                from = %current,
                to = %next,
                "Rejected proxy status transition"
            );
            return false;
        }
        record.status = next;
        tracing::debug!(proxy = %redact_proxy_url(url), from = %current, to = %next, "Proxy status changed");
        true
    }

    /// Operator reload: every proxy back to `untested`. Bindings are kept.
    pub(super) fn reset_statuses(&mut self) {
        for record in self.proxies.values_mut() {
            record.status = ProxyStatus::Untested;
        }
    }

    /// Bind `email` to an existing proxy. The caller has already cleared
    /// any previous binding.
    pub(super) fn bind(&mut self, email: &str, url: &str) -> bool {
        let Some(record) = self.proxies.get_mut(url) else {
            return false;
        };
        record.assigned_accounts.insert(email.to_string());
        self.bindings.insert(email.to_string(), url.to_string());
        true
    }

    /// Drop the binding for `email` from both sides. Returns the old proxy.
    pub(super) fn unbind(&mut self, email: &str) -> Option<String> {
        let url = self.bindings.remove(email)?;
        if let Some(record) = self.proxies.get_mut(&url) {
            record.assigned_accounts.remove(email);
        }
        Some(url)
    }

    pub(super) fn take_orphans(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.orphans)
    }

    pub(super) fn forget_orphan(&mut self, email: &str) -> bool {
        self.orphans.remove(email)
    }

    pub(super) fn status_snapshot(&self) -> ProxyStatusMap {
        self.proxies.iter().map(|(url, record)| (url.clone(), record.status)).collect()
    }

    /// Verify the bidirectional binding invariant.
    pub(super) fn check_invariants(&self) -> Result<(), String> {
        for (email, url) in &self.bindings {
            let record = self
                .proxies
                .get(url)
                .ok_or_else(|| format!("{} is bound to unknown proxy {}", email, url))?;
            if !record.assigned_accounts.contains(email) {
                return Err(format!("{} bound to {} but missing from its assignments", email, url));
            }
        }
        for (url, record) in &self.proxies {
            for email in &record.assigned_accounts {
                if self.bindings.get(email) != Some(url) {
                    return Err(format!("{} lists {} without a matching binding", url, email));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P1: &str = "socks5://10.0.0.1:1080";
    const P2: &str = "socks5://10.0.0.2:1080";

    #[test]
    fn test_restore_separates_orphans() {
        let statuses = ProxyStatusMap::from([(P1.to_string(), ProxyStatus::Available)]);
        let bindings = BindingMap::from([
            ("a@x.com".to_string(), P1.to_string()),
            ("b@x.com".to_string(), P2.to_string()),
        ]);

        let mut state = PoolState::restore(statuses, bindings);
        assert!(state.check_invariants().is_ok());
        assert_eq!(state.binding("a@x.com").map(String::as_str), Some(P1));
        assert!(state.binding("b@x.com").is_none());
        assert_eq!(state.take_orphans().into_iter().collect::<Vec<_>>(), vec!["b@x.com"]);
    }

    #[test]
    fn test_transition_rules() {
        let mut state = PoolState::default();
        state.insert_proxy(P1);

        assert!(state.transition(P1, ProxyStatus::Available));
        assert!(!state.transition(P1, ProxyStatus::Available));
        assert!(!state.transition(P1, ProxyStatus::Untested));
        assert!(state.transition(P1, ProxyStatus::Failed));
        assert!(!state.transition(P2, ProxyStatus::Failed));

        state.reset_statuses();
        assert_eq!(state.get(P1).map(|r| r.status), Some(ProxyStatus::Untested));
    }

    #[test]
    fn test_remove_proxy_unbinds_everyone() {
        let mut state = PoolState::default();
        state.insert_proxy(P1);
        state.insert_proxy(P2);
        state.bind("a@x.com", P1);
        state.bind("b@x.com", P1);
        state.bind("c@x.com", P2);

        let unbound = state.remove_proxy(P1).unwrap();
        assert_eq!(unbound, vec!["a@x.com", "b@x.com"]);
        assert!(state.check_invariants().is_ok());
        assert_eq!(state.bindings().len(), 1);
        assert!(state.remove_proxy(P1).is_none());
    }

    #[test]
    fn test_invariant_violation_is_detected() {
        let mut state = PoolState::default();
        state.insert_proxy(P1);
        state.bindings.insert("a@x.com".to_string(), P1.to_string());
        assert!(state.check_invariants().is_err());
    }
}
