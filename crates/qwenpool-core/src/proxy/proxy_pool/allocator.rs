//! Binding allocator: tiered proxy search for one account.

use rand::seq::SliceRandom;
use std::fmt;

use super::state::PoolState;
use super::ProxyPool;
use crate::utils::http::redact_proxy_url;
use qwenpool_types::error::ProxyError;
use qwenpool_types::models::ProxyStatus;

/// Search tiers, tried in order. The first successful probe wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationTier {
    /// Unused `available` proxies
    Unused,
    /// Unused `untested` proxies, random order
    Untested,
    /// Unused `failed` proxies, random order (recovery attempt)
    Recovery,
    /// Already bound proxies, least loaded first
    Shared,
}

impl AllocationTier {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unused => "P1",
            Self::Untested => "P2",
            Self::Recovery => "P3",
            Self::Shared => "P4",
        }
    }

    const fn is_exclusive(self) -> bool {
        !matches!(self, Self::Shared)
    }
}

impl fmt::Display for AllocationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of committing a probed candidate.
enum Commit {
    Bound(String),
    Skip,
}

impl ProxyPool {
    /// Return a proxy bound to `email`, binding one if needed.
    ///
    /// With `force_new` the current binding is dropped before the search, so
    /// the account never holds two claims at once. The old proxy is not
    /// excluded: if it is still the best candidate it may be chosen again.
    pub async fn assign_proxy(&self, email: &str, force_new: bool) -> Result<String, ProxyError> {
        {
            let mut state = self.state.lock().await;
            if force_new {
                if let Some(previous) = state.unbind(email) {
                    self.writer.save_proxy_binding(email, None);
                    tracing::info!(
                        email = %email,
                        proxy = %redact_proxy_url(&previous),
                        "Binding released for reassignment"
                    );
                }
            } else if let Some(url) = state.binding(email) {
                return Ok(url.clone());
            }
        }

        self.search(email, None).await
    }

    /// Move `email` off `failed_url` after a transport failure through it.
    ///
    /// The proxy is marked `failed` first. If the account is no longer bound
    /// to it (a concurrent dispatch already moved it), the current binding
    /// is kept and returned. Otherwise the binding is released and the
    /// search skips `failed_url`, so the account always lands elsewhere.
    pub async fn reassign_after_failure(
        &self,
        email: &str,
        failed_url: &str,
    ) -> Result<String, ProxyError> {
        {
            let mut state = self.state.lock().await;
            if state.transition(failed_url, ProxyStatus::Failed) {
                self.writer.save_proxy_statuses(state.status_snapshot());
            }
            match state.binding(email).cloned() {
                Some(current) if current != failed_url => {
                    tracing::debug!(
                        email = %email,
                        proxy = %redact_proxy_url(&current),
                        "Account already moved off the failed proxy"
                    );
                    return Ok(current);
                },
                Some(_) => {
                    state.unbind(email);
                    self.writer.save_proxy_binding(email, None);
                },
                None => {},
            }
        }

        self.search(email, Some(failed_url)).await
    }

    /// Tiered search for an account without a binding. `exclude` is never
    /// probed or bound.
    async fn search(&self, email: &str, exclude: Option<&str>) -> Result<String, ProxyError> {
        for tier in [AllocationTier::Unused, AllocationTier::Untested, AllocationTier::Recovery] {
            let candidates = {
                let state = self.state.lock().await;
                exclusive_candidates(&state, tier, exclude)
            };
            if let Some(url) = self.try_candidates(email, tier, candidates).await {
                return Ok(url);
            }
        }

        let shared = {
            let state = self.state.lock().await;
            shared_candidates(&state, exclude)
        };
        if let Some(url) = self.try_candidates(email, AllocationTier::Shared, shared).await {
            return Ok(url);
        }

        tracing::warn!(email = %email, "No working proxy left, account is unserved");
        Err(ProxyError::PoolExhausted { email: email.to_string() })
    }

    async fn try_candidates(
        &self,
        email: &str,
        tier: AllocationTier,
        candidates: Vec<String>,
    ) -> Option<String> {
        for url in candidates {
            let ok = self.prober.probe(&url).await;

            let mut state = self.state.lock().await;
            if state.transition(&url, ProxyStatus::from_probe(ok)) {
                self.writer.save_proxy_statuses(state.status_snapshot());
            }
            if !ok {
                continue;
            }

            match self.commit(&mut state, email, &url, tier) {
                Commit::Bound(bound) => return Some(bound),
                Commit::Skip => continue,
            }
        }
        None
    }

    /// Bind after a successful probe, re-checking what may have changed
    /// while the lock was released.
    fn commit(&self, state: &mut PoolState, email: &str, url: &str, tier: AllocationTier) -> Commit {
        if let Some(existing) = state.binding(email) {
            // A concurrent assignment for the same account got there first.
            return Commit::Bound(existing.clone());
        }
        let Some(record) = state.get(url) else {
            return Commit::Skip;
        };
        if tier.is_exclusive() && !record.is_unused() {
            return Commit::Skip;
        }

        let load = record.load();
        if !state.bind(email, url) {
            return Commit::Skip;
        }
        self.writer.save_proxy_binding(email, Some(url));

        if tier.is_exclusive() {
            tracing::info!(email = %email, proxy = %redact_proxy_url(url), tier = %tier, "Proxy bound");
        } else {
            tracing::warn!(
                email = %email,
                proxy = %redact_proxy_url(url),
                tier = %tier,
                shared_with = load,
                "No spare proxy, sharing a bound one"
            );
        }
        Commit::Bound(url.to_string())
    }
}

/// Unused proxies in the tier's status. Untested and failed candidates are
/// visited in random order.
fn exclusive_candidates(
    state: &PoolState,
    tier: AllocationTier,
    exclude: Option<&str>,
) -> Vec<String> {
    let status = match tier {
        AllocationTier::Unused => ProxyStatus::Available,
        AllocationTier::Untested => ProxyStatus::Untested,
        AllocationTier::Recovery => ProxyStatus::Failed,
        AllocationTier::Shared => return Vec::new(),
    };

    let mut candidates: Vec<String> = state
        .records()
        .filter(|r| r.status == status && r.is_unused() && Some(r.url.as_str()) != exclude)
        .map(|r| r.url.clone())
        .collect();

    if tier != AllocationTier::Unused {
        candidates.shuffle(&mut rand::thread_rng());
    }
    candidates
}

/// Bound proxies by ascending load, url as tie-break.
///
/// A bound proxy can still be `untested` after an operator reload; it is
/// probed here like any other and turns `available` on success.
fn shared_candidates(state: &PoolState, exclude: Option<&str>) -> Vec<String> {
    let mut shared: Vec<(usize, String)> = state
        .records()
        .filter(|r| {
            r.status != ProxyStatus::Failed && !r.is_unused() && Some(r.url.as_str()) != exclude
        })
        .map(|r| (r.load(), r.url.clone()))
        .collect();
    shared.sort();
    shared.into_iter().map(|(_, url)| url).collect()
}
