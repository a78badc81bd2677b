#![allow(unused_crate_dependencies)]
#![allow(clippy::tests_outside_test_module, reason = "integration tests live in tests/ dir")]
#![allow(clippy::unwrap_used, reason = "integration test: panics are the assertion mechanism")]

mod common;

use std::time::Duration;

use common::{bootstrap, closed_port, config_for, signed_in, ScriptedProber};
use qwenpool_core::modules::oauth::PollPolicy;
use qwenpool_core::modules::persistence::PersistedState;
use qwenpool_core::proxy::{ChatRequest, DispatchError, DispatchStage};
use qwenpool_types::models::{AccountRecord, ProxyStatus};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const P1: &str = "socks5://10.0.0.1:1080";
const P2: &str = "socks5://10.0.0.2:1080";

fn state_with(
    accounts: Vec<AccountRecord>,
    statuses: &[(&str, ProxyStatus)],
    bindings: &[(&str, &str)],
) -> PersistedState {
    let mut state = PersistedState { accounts, ..PersistedState::default() };
    for (url, status) in statuses {
        state.statuses.insert((*url).to_string(), *status);
    }
    for (email, url) in bindings {
        state.bindings.insert((*email).to_string(), (*url).to_string());
    }
    state
}

#[tokio::test]
async fn scenario_a_first_untested_success_binds_and_flips() {
    let dir = tempfile::tempdir().unwrap();
    let prober = ScriptedProber::with(&[(P1, true), (P2, true)]);
    let (context, _store) = bootstrap(
        config_for("http://127.0.0.1:9"),
        dir.path(),
        state_with(vec![], &[(P1, ProxyStatus::Untested), (P2, ProxyStatus::Untested)], &[]),
        prober.clone(),
    )
    .await;

    let bound = context.pool.assign_proxy("a@x", false).await.unwrap();

    assert_eq!(prober.calls(), vec![bound.clone()]);
    assert_eq!(context.pool.status_of(&bound).await, Some(ProxyStatus::Available));
    let other = if bound == P1 { P2 } else { P1 };
    assert_eq!(context.pool.status_of(other).await, Some(ProxyStatus::Untested));

    // Idempotent: no second probe
    assert_eq!(context.pool.assign_proxy("a@x", false).await.unwrap(), bound);
    assert_eq!(prober.calls().len(), 1);
    assert!(context.pool.check_invariants().await.is_ok());
}

#[tokio::test]
async fn scenario_b_refresh_keeps_refresh_token_when_omitted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "access_token": "at2", "expires_in": 7200 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut account = AccountRecord::cli("a@x", "rt1");
    account.access_token = Some("at1".to_string());
    account.token_expiry = Some(common::now_ms() - 1);
    let (context, _store) = bootstrap(
        config_for(&server.uri()),
        dir.path(),
        state_with(vec![account.clone()], &[], &[]),
        ScriptedProber::with(&[]),
    )
    .await;

    let before = common::now_ms();
    let issued = context.lifecycle.refresh_access_token(&account, None).await.unwrap();
    let after = common::now_ms();

    assert_eq!(issued.access_token, "at2");
    assert_eq!(issued.refresh_token.as_deref(), Some("rt1"));
    assert!(issued.expiry >= before + 7_200_000 && issued.expiry <= after + 7_200_000);
}

#[tokio::test]
async fn scenario_c_transport_failure_fails_proxy_and_reassigns() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/chats/new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": { "id": "c1" } })))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let dead = format!("socks5://127.0.0.1:{}", closed_port());
    let dir = tempfile::tempdir().unwrap();
    let prober = ScriptedProber::with(&[(dead.as_str(), false), (P2, true)]);
    let (context, store) = bootstrap(
        config_for(&server.uri()),
        dir.path(),
        state_with(
            vec![signed_in("a@x")],
            &[(dead.as_str(), ProxyStatus::Available), (P2, ProxyStatus::Untested)],
            &[("a@x", dead.as_str())],
        ),
        prober,
    )
    .await;

    let err = context
        .dispatcher
        .send_chat_request(ChatRequest::user_prompt("qwen-max", "hello", false))
        .await
        .unwrap_err();

    match err {
        DispatchError::Network { stage, reassigned_to, .. } => {
            assert_eq!(stage, DispatchStage::Session);
            assert_eq!(reassigned_to.as_deref(), Some(P2));
        },
        other => panic!("expected network failure, got {other:?}"),
    }
    assert_eq!(context.pool.status_of(&dead).await, Some(ProxyStatus::Failed));
    assert_eq!(context.pool.binding_for("a@x").await.as_deref(), Some(P2));
    assert!(context.pool.check_invariants().await.is_ok());

    context.shutdown().await;
    let persisted = store.snapshot().await;
    assert_eq!(persisted.statuses.get(&dead), Some(&ProxyStatus::Failed));
    assert_eq!(persisted.bindings.get("a@x").map(String::as_str), Some(P2));
}

#[tokio::test]
async fn scenario_d_device_flow_succeeds_on_third_poll() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/oauth2/device/code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "device_code": "D1",
            "user_code": "U1",
            "verification_uri": "https://chat.example/authorize",
            "expires_in": 300
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/oauth2/authorize"))
        .and(header("authorization", "Bearer admin-token"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/oauth2/token"))
        .and(body_string_contains("device_code=D1"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(serde_json::json!({ "error": "authorization_pending" })),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/oauth2/token"))
        .and(body_string_contains("device_code=D1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "cli-at",
            "refresh_token": "cli-rt",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (context, _store) =
        bootstrap(config_for(&server.uri()), dir.path(), PersistedState::default(), ScriptedProber::with(&[]))
            .await;
    let lifecycle = qwenpool_core::modules::oauth::CredentialLifecycle::new(
        context.clients.clone(),
        &context.config,
    )
    .with_poll_policy(PollPolicy { interval: Duration::from_millis(10), max_attempts: 60 });

    let session = lifecycle.initiate_device_flow(None).await.unwrap();
    assert_eq!(session.device_code, "D1");
    assert_eq!(session.user_code, "U1");
    assert!(lifecycle.authorize_login("U1", "admin-token", None).await);

    let token = lifecycle.poll_for_token("D1", &session.code_verifier, None).await.unwrap();
    assert_eq!(token.access_token, "cli-at");
    assert_eq!(token.refresh_token.as_deref(), Some("cli-rt"));

    let polls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/api/v1/oauth2/token")
        .count();
    assert_eq!(polls, 3);
}

#[tokio::test]
async fn scenario_e_scarcity_shares_the_only_proxy() {
    let dir = tempfile::tempdir().unwrap();
    let (context, store) = bootstrap(
        config_for("http://127.0.0.1:9"),
        dir.path(),
        state_with(vec![], &[(P1, ProxyStatus::Available)], &[]),
        ScriptedProber::with(&[(P1, true)]),
    )
    .await;

    assert_eq!(context.pool.assign_proxy("a@x", false).await.unwrap(), P1);
    assert_eq!(context.pool.assign_proxy("b@x", false).await.unwrap(), P1);
    assert!(context.pool.check_invariants().await.is_ok());

    // Still shared after a rebalance: no spare exists
    assert!(context.rebalance().await.is_empty());

    context.shutdown().await;
    let persisted = store.snapshot().await;
    assert_eq!(persisted.bindings.get("a@x").map(String::as_str), Some(P1));
    assert_eq!(persisted.bindings.get("b@x").map(String::as_str), Some(P1));
}

#[tokio::test]
async fn rebalance_splits_shared_proxy_once_a_spare_appears() {
    let dir = tempfile::tempdir().unwrap();
    let (context, _store) = bootstrap(
        config_for("http://127.0.0.1:9"),
        dir.path(),
        state_with(
            vec![signed_in("a@x"), signed_in("b@x")],
            &[(P1, ProxyStatus::Available)],
            &[("a@x", P1), ("b@x", P1)],
        ),
        ScriptedProber::with(&[(P1, true), (P2, true)]),
    )
    .await;

    assert!(context.pool.add_proxy(P2).await);
    let moved = context.rebalance().await;

    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].email, "b@x");
    assert_eq!(moved[0].proxy.as_deref(), Some(P2));
    assert!(context.pool.snapshot().await.iter().all(|r| r.load() == 1));
    assert!(context.pool.check_invariants().await.is_ok());
}

#[tokio::test]
async fn remove_proxy_leaves_no_dangling_binding() {
    let dir = tempfile::tempdir().unwrap();
    let (context, _store) = bootstrap(
        config_for("http://127.0.0.1:9"),
        dir.path(),
        state_with(
            vec![signed_in("a@x"), signed_in("b@x")],
            &[(P1, ProxyStatus::Available), (P2, ProxyStatus::Available)],
            &[("a@x", P1), ("b@x", P2)],
        ),
        ScriptedProber::with(&[]),
    )
    .await;

    assert!(context.pool.remove_proxy(P1).await);
    assert!(context.pool.binding_for("a@x").await.is_none());
    assert!(context.pool.bindings().await.values().all(|url| url != P1));
    assert!(context.pool.check_invariants().await.is_ok());

    context.registry.remove_account("b@x").await.unwrap();
    assert!(context.pool.binding_for("b@x").await.is_none());
    assert!(context.pool.check_invariants().await.is_ok());
}
