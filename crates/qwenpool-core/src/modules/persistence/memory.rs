//! In-process backend for ephemeral runs and tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::{
    BindingMap, PersistResult, PersistedState, PersistenceError, PersistenceGateway,
    ProxyStatusMap, Settings,
};
use qwenpool_types::models::AccountRecord;

/// Keeps everything in memory. Can be flipped to "unavailable" to emulate a
/// backend that cannot be reached.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<PersistedState>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `state`.
    pub fn with_state(state: PersistedState) -> Self {
        Self { state: Mutex::new(state), unavailable: AtomicBool::new(false) }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Copy of everything stored so far.
    pub async fn snapshot(&self) -> PersistedState {
        self.state.lock().await.clone()
    }

    fn check(&self) -> PersistResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn load_accounts(&self) -> PersistResult<Vec<AccountRecord>> {
        self.check()?;
        Ok(self.state.lock().await.accounts.clone())
    }

    async fn save_account(&self, email: &str, data: &AccountRecord) -> PersistResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.accounts.iter_mut().find(|a| a.email == email) {
            Some(existing) => *existing = data.clone(),
            None => state.accounts.push(data.clone()),
        }
        Ok(())
    }

    async fn save_all_accounts(&self, accounts: &[AccountRecord]) -> PersistResult<()> {
        self.check()?;
        self.state.lock().await.accounts = accounts.to_vec();
        Ok(())
    }

    async fn load_proxy_bindings(&self) -> PersistResult<BindingMap> {
        self.check()?;
        Ok(self.state.lock().await.bindings.clone())
    }

    async fn save_proxy_binding(&self, email: &str, proxy_url: Option<&str>) -> PersistResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        match proxy_url {
            Some(url) => {
                state.bindings.insert(email.to_string(), url.to_string());
            },
            None => {
                state.bindings.remove(email);
            },
        }
        Ok(())
    }

    async fn load_proxy_statuses(&self) -> PersistResult<ProxyStatusMap> {
        self.check()?;
        Ok(self.state.lock().await.statuses.clone())
    }

    async fn save_proxy_statuses(&self, statuses: &ProxyStatusMap) -> PersistResult<()> {
        self.check()?;
        self.state.lock().await.statuses = statuses.clone();
        Ok(())
    }

    async fn load_settings(&self) -> PersistResult<Settings> {
        self.check()?;
        Ok(self.state.lock().await.settings.clone())
    }

    async fn save_setting(&self, key: &str, value: &str) -> PersistResult<()> {
        self.check()?;
        self.state.lock().await.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
