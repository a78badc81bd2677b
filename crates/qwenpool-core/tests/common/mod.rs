#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use qwenpool_core::modules::persistence::{MemoryStore, PersistedState};
use qwenpool_core::proxy::{GatewayContext, ProxyProber};
use qwenpool_types::models::{AccountRecord, GatewayConfig};

/// Prober with a fixed verdict per proxy url; unknown urls fail.
#[derive(Default)]
pub struct ScriptedProber {
    verdicts: Mutex<HashMap<String, bool>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProber {
    pub fn with(verdicts: &[(&str, bool)]) -> Arc<Self> {
        let prober = Self::default();
        {
            let mut map = prober.verdicts.lock().unwrap();
            for (url, ok) in verdicts {
                map.insert((*url).to_string(), *ok);
            }
        }
        Arc::new(prober)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProxyProber for ScriptedProber {
    async fn probe(&self, proxy_url: &str) -> bool {
        self.calls.lock().unwrap().push(proxy_url.to_string());
        self.verdicts.lock().unwrap().get(proxy_url).copied().unwrap_or(false)
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Web account holding a token valid for the next hour.
pub fn signed_in(email: &str) -> AccountRecord {
    let mut account = AccountRecord::web(email, "pw");
    account.access_token = Some(format!("at-{}", email));
    account.token_expiry = Some(now_ms() + 3_600_000);
    account
}

/// Config pointing every upstream call at `base_url`.
pub fn config_for(base_url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.upstream.chat_base_url = base_url.to_string();
    config.upstream.oauth_base_url = base_url.to_string();
    config
}

pub async fn bootstrap(
    config: GatewayConfig,
    data_dir: &Path,
    state: PersistedState,
    prober: Arc<ScriptedProber>,
) -> (GatewayContext, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_state(state));
    let prober: Arc<dyn ProxyProber> = prober;
    let context =
        GatewayContext::bootstrap(config, data_dir, store.clone(), Some(prober)).await.unwrap();
    (context, store)
}

/// Loopback address nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
