//! Durable store contract for accounts, proxy statuses, bindings and settings.
//!
//! The in-memory pool and registry are authoritative; a backend is only a
//! durability mirror. Mutations reach it through [`PersistenceWriter`], so
//! the dispatch path never awaits storage I/O.

mod file_store;
mod memory;
mod writer;

pub use file_store::JsonFileStore;
pub use memory::MemoryStore;
pub use writer::PersistenceWriter;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

use qwenpool_types::models::{AccountRecord, ProxyStatus};

/// Persisted proxy statuses keyed by proxy url. The key set is the proxy list.
pub type ProxyStatusMap = BTreeMap<String, ProxyStatus>;

/// Persisted `email -> proxy url` bindings.
pub type BindingMap = HashMap<String, String>;

pub type Settings = BTreeMap<String, String>;

pub type PersistResult<T> = Result<T, PersistenceError>;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Backend-agnostic persistence operations.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn load_accounts(&self) -> PersistResult<Vec<AccountRecord>>;

    /// Insert or replace one account, keyed by `email`.
    async fn save_account(&self, email: &str, data: &AccountRecord) -> PersistResult<()>;

    /// Replace the whole account list.
    async fn save_all_accounts(&self, accounts: &[AccountRecord]) -> PersistResult<()>;

    async fn load_proxy_bindings(&self) -> PersistResult<BindingMap>;

    /// Upsert a binding, or clear it when `proxy_url` is `None`.
    async fn save_proxy_binding(&self, email: &str, proxy_url: Option<&str>) -> PersistResult<()>;

    async fn load_proxy_statuses(&self) -> PersistResult<ProxyStatusMap>;

    /// Replace the status snapshot.
    async fn save_proxy_statuses(&self, statuses: &ProxyStatusMap) -> PersistResult<()>;

    async fn load_settings(&self) -> PersistResult<Settings>;

    async fn save_setting(&self, key: &str, value: &str) -> PersistResult<()>;
}

/// Everything a gateway needs at startup, read in one pass.
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub accounts: Vec<AccountRecord>,
    pub statuses: ProxyStatusMap,
    pub bindings: BindingMap,
    pub settings: Settings,
}

impl PersistedState {
    /// Read every concern from `store`. Any failure is returned as-is and is
    /// fatal for the caller.
    pub async fn load(store: &dyn PersistenceGateway) -> PersistResult<Self> {
        Ok(Self {
            settings: store.load_settings().await?,
            accounts: store.load_accounts().await?,
            statuses: store.load_proxy_statuses().await?,
            bindings: store.load_proxy_bindings().await?,
        })
    }
}
