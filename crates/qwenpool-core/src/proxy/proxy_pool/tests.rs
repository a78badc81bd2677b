use super::*;
use crate::modules::persistence::{MemoryStore, PersistedState};
use async_trait::async_trait;
use qwenpool_types::error::ProxyError;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

const P1: &str = "socks5://10.0.0.1:1080";
const P2: &str = "socks5://10.0.0.2:1080";
const P3: &str = "socks5://10.0.0.3:1080";

/// Prober with a fixed verdict per url (unknown urls fail) and a call log.
#[derive(Default)]
struct ScriptedProber {
    verdicts: StdMutex<HashMap<String, bool>>,
    calls: StdMutex<Vec<String>>,
}

impl ScriptedProber {
    fn with(verdicts: &[(&str, bool)]) -> Arc<Self> {
        let prober = Self::default();
        prober.set(verdicts);
        Arc::new(prober)
    }

    fn set(&self, verdicts: &[(&str, bool)]) {
        let mut map = self.verdicts.lock().unwrap();
        for (url, ok) in verdicts {
            map.insert((*url).to_string(), *ok);
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProxyProber for ScriptedProber {
    async fn probe(&self, proxy_url: &str) -> bool {
        self.calls.lock().unwrap().push(proxy_url.to_string());
        tokio::task::yield_now().await;
        self.verdicts.lock().unwrap().get(proxy_url).copied().unwrap_or(false)
    }
}

fn build(
    statuses: &[(&str, ProxyStatus)],
    bindings: &[(&str, &str)],
    prober: Arc<ScriptedProber>,
) -> (ProxyPool, Arc<MemoryStore>, PersistenceWriter) {
    let statuses: ProxyStatusMap = statuses.iter().map(|(u, s)| ((*u).to_string(), *s)).collect();
    let bindings: BindingMap =
        bindings.iter().map(|(e, u)| ((*e).to_string(), (*u).to_string())).collect();
    // The store starts out holding what the pool is restored from
    let store = Arc::new(MemoryStore::with_state(PersistedState {
        statuses: statuses.clone(),
        bindings: bindings.clone(),
        ..PersistedState::default()
    }));
    let writer = PersistenceWriter::spawn(store.clone());
    let clients = Arc::new(ClientCache::new("qwenpool-test").unwrap());
    let pool = ProxyPool::restore(statuses, bindings, prober, writer.clone(), clients);
    (pool, store, writer)
}

#[tokio::test]
async fn test_add_and_remove_proxy_persist() {
    let (pool, store, writer) = build(&[], &[], ScriptedProber::with(&[]));

    assert!(pool.add_proxy(P1).await);
    assert!(!pool.add_proxy(P1).await);
    assert_eq!(pool.status_of(P1).await, Some(ProxyStatus::Untested));

    assert!(pool.remove_proxy(P1).await);
    assert!(!pool.remove_proxy(P1).await);
    writer.flush().await;
    assert!(store.snapshot().await.statuses.is_empty());
}

#[tokio::test]
async fn test_assign_is_idempotent_without_probe() {
    let prober = ScriptedProber::with(&[(P1, true)]);
    let (pool, _store, _writer) = build(&[(P1, ProxyStatus::Untested)], &[], prober.clone());

    let first = pool.assign_proxy("a@x.com", false).await.unwrap();
    let second = pool.assign_proxy("a@x.com", false).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(prober.calls().len(), 1);
    assert!(pool.check_invariants().await.is_ok());
}

#[tokio::test]
async fn test_unused_available_preferred_over_untested() {
    let prober = ScriptedProber::with(&[(P1, true), (P2, true)]);
    let (pool, _store, _writer) = build(
        &[(P1, ProxyStatus::Untested), (P2, ProxyStatus::Available)],
        &[],
        prober.clone(),
    );

    assert_eq!(pool.assign_proxy("a@x.com", false).await.unwrap(), P2);
    assert_eq!(prober.calls(), vec![P2.to_string()]);
    assert_eq!(pool.status_of(P1).await, Some(ProxyStatus::Untested));
}

#[tokio::test]
async fn test_untested_tier_flips_winner_to_available() {
    let prober = ScriptedProber::with(&[(P1, false), (P2, true)]);
    let (pool, store, writer) =
        build(&[(P1, ProxyStatus::Untested), (P2, ProxyStatus::Untested)], &[], prober.clone());

    let bound = pool.assign_proxy("a@x.com", false).await.unwrap();
    assert_eq!(bound, P2);
    assert_eq!(pool.status_of(P2).await, Some(ProxyStatus::Available));

    // P1 was only probed if the shuffle visited it first.
    let expected_p1 =
        if prober.calls().len() == 2 { ProxyStatus::Failed } else { ProxyStatus::Untested };
    assert_eq!(pool.status_of(P1).await, Some(expected_p1));

    writer.flush().await;
    let persisted = store.snapshot().await;
    assert_eq!(persisted.bindings.get("a@x.com").map(String::as_str), Some(P2));
    assert_eq!(persisted.statuses.get(P2), Some(&ProxyStatus::Available));
}

#[tokio::test]
async fn test_failed_proxy_recovers_in_last_exclusive_tier() {
    let prober = ScriptedProber::with(&[(P1, true)]);
    let (pool, _store, _writer) = build(&[(P1, ProxyStatus::Failed)], &[], prober);

    assert_eq!(pool.assign_proxy("a@x.com", false).await.unwrap(), P1);
    assert_eq!(pool.status_of(P1).await, Some(ProxyStatus::Available));
}

#[tokio::test]
async fn test_exhausted_pool_is_an_error_value() {
    let prober = ScriptedProber::with(&[(P1, false), (P2, false)]);
    let (pool, _store, _writer) =
        build(&[(P1, ProxyStatus::Untested), (P2, ProxyStatus::Failed)], &[], prober);

    let err = pool.assign_proxy("a@x.com", false).await.unwrap_err();
    assert!(matches!(err, ProxyError::PoolExhausted { .. }));
    assert!(pool.binding_for("a@x.com").await.is_none());
    assert_eq!(pool.status_of(P1).await, Some(ProxyStatus::Failed));
    assert!(pool.check_invariants().await.is_ok());
}

#[tokio::test]
async fn test_force_new_releases_before_search() {
    let prober = ScriptedProber::with(&[(P1, false), (P2, true)]);
    let (pool, _store, _writer) = build(
        &[(P1, ProxyStatus::Available), (P2, ProxyStatus::Untested)],
        &[("a@x.com", P1)],
        prober,
    );

    assert_eq!(pool.assign_proxy("a@x.com", true).await.unwrap(), P2);
    let snapshot = pool.snapshot().await;
    assert!(snapshot.iter().find(|r| r.url == P1).unwrap().is_unused());
    assert!(pool.check_invariants().await.is_ok());
}

#[tokio::test]
async fn test_failure_reassignment_never_returns_failed_proxy() {
    // Both proxies would pass a check, so only the exclusion keeps P1 out of P3
    for _ in 0..10 {
        let prober = ScriptedProber::with(&[(P1, true), (P2, true)]);
        let (pool, _store, _writer) = build(
            &[(P1, ProxyStatus::Available), (P2, ProxyStatus::Failed)],
            &[("a@x.com", P1)],
            prober.clone(),
        );

        assert_eq!(pool.reassign_after_failure("a@x.com", P1).await.unwrap(), P2);
        assert_eq!(pool.status_of(P1).await, Some(ProxyStatus::Failed));
        assert!(!prober.calls().iter().any(|url| url == P1));
        assert!(pool.check_invariants().await.is_ok());
    }
}

#[tokio::test]
async fn test_failure_reassignment_with_no_alternative_is_exhaustion() {
    let prober = ScriptedProber::with(&[(P1, true)]);
    let (pool, _store, _writer) =
        build(&[(P1, ProxyStatus::Available)], &[("a@x.com", P1)], prober);

    let err = pool.reassign_after_failure("a@x.com", P1).await.unwrap_err();
    assert!(matches!(err, ProxyError::PoolExhausted { .. }));
    assert!(pool.binding_for("a@x.com").await.is_none());
    assert_eq!(pool.status_of(P1).await, Some(ProxyStatus::Failed));
}

#[tokio::test]
async fn test_failure_reassignment_keeps_newer_binding() {
    let prober = ScriptedProber::with(&[(P3, true)]);
    let (pool, store, writer) = build(
        &[(P1, ProxyStatus::Available), (P2, ProxyStatus::Available), (P3, ProxyStatus::Untested)],
        &[("a@x.com", P2)],
        prober.clone(),
    );

    // The account already moved from P1 to P2 in another dispatch
    assert_eq!(pool.reassign_after_failure("a@x.com", P1).await.unwrap(), P2);
    assert_eq!(pool.binding_for("a@x.com").await.as_deref(), Some(P2));
    assert_eq!(pool.status_of(P1).await, Some(ProxyStatus::Failed));
    assert!(prober.calls().is_empty());

    writer.flush().await;
    assert_eq!(store.snapshot().await.bindings.get("a@x.com").map(String::as_str), Some(P2));
}

#[tokio::test]
async fn test_sharing_when_no_spare_proxy() {
    let prober = ScriptedProber::with(&[(P1, true)]);
    let (pool, store, writer) = build(&[(P1, ProxyStatus::Available)], &[], prober);

    assert_eq!(pool.assign_proxy("a@x.com", false).await.unwrap(), P1);
    assert_eq!(pool.assign_proxy("b@x.com", false).await.unwrap(), P1);

    let record = pool.snapshot().await.remove(0);
    assert_eq!(record.load(), 2);
    writer.flush().await;
    assert_eq!(store.snapshot().await.bindings.len(), 2);
}

#[tokio::test]
async fn test_shared_tier_prefers_least_loaded() {
    let prober = ScriptedProber::with(&[(P1, true), (P2, true)]);
    let (pool, _store, _writer) = build(
        &[(P1, ProxyStatus::Available), (P2, ProxyStatus::Available)],
        &[("a@x.com", P1), ("b@x.com", P1), ("c@x.com", P2)],
        prober,
    );

    assert_eq!(pool.assign_proxy("d@x.com", false).await.unwrap(), P2);
}

#[tokio::test]
async fn test_remove_proxy_clears_bindings() {
    let (pool, store, writer) = build(
        &[(P1, ProxyStatus::Available), (P2, ProxyStatus::Available)],
        &[("a@x.com", P1), ("b@x.com", P1), ("c@x.com", P2)],
        ScriptedProber::with(&[]),
    );

    assert!(pool.remove_proxy(P1).await);
    let bindings = pool.bindings().await;
    assert!(bindings.values().all(|url| url != P1));
    assert!(pool.snapshot().await.iter().all(|r| !r.assigned_accounts.contains("a@x.com")));
    assert!(pool.check_invariants().await.is_ok());

    writer.flush().await;
    let persisted = store.snapshot().await;
    assert!(!persisted.statuses.contains_key(P1));
    assert!(persisted.bindings.values().all(|url| url != P1));
}

#[tokio::test]
async fn test_mark_failed_and_check() {
    let prober = ScriptedProber::with(&[(P1, true)]);
    let (pool, _store, _writer) = build(&[(P1, ProxyStatus::Available)], &[], prober);

    assert!(pool.mark_failed(P1).await);
    assert!(!pool.mark_failed(P1).await);
    assert!(!pool.mark_failed(P2).await);

    assert_eq!(pool.check_proxy(P1).await, Some(ProxyStatus::Available));
    assert_eq!(pool.check_proxy(P2).await, None);
}

#[tokio::test]
async fn test_reload_resets_statuses_and_keeps_bindings() {
    let (pool, _store, _writer) = build(
        &[(P1, ProxyStatus::Available), (P2, ProxyStatus::Failed)],
        &[("a@x.com", P1)],
        ScriptedProber::with(&[]),
    );

    let added = pool.reload(&[P2.to_string(), P3.to_string()]).await;
    assert_eq!(added, 1);
    assert!(pool.snapshot().await.iter().all(|r| r.status == ProxyStatus::Untested));
    assert_eq!(pool.binding_for("a@x.com").await.as_deref(), Some(P1));
}

#[tokio::test]
async fn test_bound_untested_proxy_reachable_through_shared_tier() {
    let prober = ScriptedProber::with(&[(P1, true)]);
    let (pool, _store, _writer) =
        build(&[(P1, ProxyStatus::Untested)], &[("a@x.com", P1)], prober);

    assert_eq!(pool.assign_proxy("b@x.com", false).await.unwrap(), P1);
    assert_eq!(pool.status_of(P1).await, Some(ProxyStatus::Available));
}

#[tokio::test]
async fn test_rebalance_reasons() {
    let prober = ScriptedProber::with(&[(P1, false)]);
    let (pool, store, writer) = build(
        &[(P1, ProxyStatus::Untested), (P2, ProxyStatus::Available), (P3, ProxyStatus::Untested)],
        &[
            ("a@x.com", P1),
            ("b@x.com", P2),
            ("c@x.com", P2),
            ("d@x.com", "socks5://10.9.9.9:1080"),
        ],
        prober,
    );

    let reassign = pool.validate_and_rebalance_bindings().await;

    assert_eq!(reassign.get("a@x.com"), Some(&ReassignReason::StaleBinding));
    assert_eq!(reassign.get("c@x.com"), Some(&ReassignReason::DuplicateBinding));
    assert_eq!(reassign.get("d@x.com"), Some(&ReassignReason::ProxyRemoved));
    assert!(!reassign.contains_key("b@x.com"));
    assert_eq!(pool.status_of(P1).await, Some(ProxyStatus::Failed));
    assert!(pool.snapshot().await.iter().all(|r| r.load() <= 1));
    assert!(pool.check_invariants().await.is_ok());

    writer.flush().await;
    let persisted = store.snapshot().await;
    assert_eq!(persisted.bindings.len(), 1);
    assert_eq!(persisted.bindings.get("b@x.com").map(String::as_str), Some(P2));
}

#[tokio::test]
async fn test_rebalance_keeps_sharing_without_spare() {
    let (pool, _store, _writer) = build(
        &[(P1, ProxyStatus::Available), (P2, ProxyStatus::Failed)],
        &[("a@x.com", P1), ("b@x.com", P1)],
        ScriptedProber::with(&[]),
    );

    assert!(pool.validate_and_rebalance_bindings().await.is_empty());
    assert_eq!(pool.bindings().await.len(), 2);
}

#[tokio::test]
async fn test_concurrent_assignments_stay_consistent() {
    let urls: Vec<String> = (1..=6).map(|i| format!("socks5://10.1.0.{}:1080", i)).collect();
    let verdicts: Vec<(&str, bool)> = urls.iter().map(|u| (u.as_str(), true)).collect();
    let statuses: Vec<(&str, ProxyStatus)> =
        urls.iter().map(|u| (u.as_str(), ProxyStatus::Untested)).collect();
    let (pool, _store, _writer) = build(&statuses, &[], ScriptedProber::with(&verdicts));
    let pool = Arc::new(pool);

    let mut handles = Vec::new();
    for i in 0..6 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.assign_proxy(&format!("user{}@x.com", i), false).await
        }));
    }
    // Same account twice, concurrently
    let dup_a = tokio::spawn({
        let pool = pool.clone();
        async move { pool.assign_proxy("user0@x.com", false).await }
    });

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    let dup = dup_a.await.unwrap().unwrap();

    let bindings = pool.bindings().await;
    assert_eq!(bindings.len(), 6);
    assert_eq!(bindings.get("user0@x.com"), Some(&dup));
    assert!(pool.snapshot().await.iter().all(|r| r.load() == 1));
    assert!(pool.check_invariants().await.is_ok());
}
