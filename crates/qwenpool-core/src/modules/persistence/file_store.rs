//! Flat JSON file backend: one document per concern under the data directory.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{
    BindingMap, PersistResult, PersistenceError, PersistenceGateway, ProxyStatusMap, Settings,
};
use qwenpool_types::models::AccountRecord;

const ACCOUNTS_FILE: &str = "accounts.json";
const BINDINGS_FILE: &str = "proxy_bindings.json";
const STATUSES_FILE: &str = "proxy_statuses.json";
const SETTINGS_FILE: &str = "settings.json";

/// JSON documents written atomically (temp file + rename), one lock per file.
pub struct JsonFileStore {
    data_dir: PathBuf,
    accounts_lock: Mutex<()>,
    bindings_lock: Mutex<()>,
    statuses_lock: Mutex<()>,
    settings_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            accounts_lock: Mutex::new(()),
            bindings_lock: Mutex::new(()),
            statuses_lock: Mutex::new(()),
            settings_lock: Mutex::new(()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }
}

/// Missing file reads as `T::default()`; unreadable or corrupt is an error.
async fn read_json<T>(path: &Path) -> PersistResult<T>
where
    T: DeserializeOwned + Default,
{
    match tokio::fs::read_to_string(path).await {
        Ok(content) if content.trim().is_empty() => Ok(T::default()),
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(PersistenceError::Io(e)),
    }
}

async fn atomic_write_json<T>(path: &Path, content: &T) -> PersistResult<()>
where
    T: Serialize + ?Sized,
{
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp_path = path.with_extension("json.tmp");
    let json_str = serde_json::to_string_pretty(content)?;

    tokio::fs::write(&temp_path, &json_str).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}

#[async_trait]
impl PersistenceGateway for JsonFileStore {
    async fn load_accounts(&self) -> PersistResult<Vec<AccountRecord>> {
        let _guard = self.accounts_lock.lock().await;
        read_json(&self.path(ACCOUNTS_FILE)).await
    }

    async fn save_account(&self, email: &str, data: &AccountRecord) -> PersistResult<()> {
        let _guard = self.accounts_lock.lock().await;
        let path = self.path(ACCOUNTS_FILE);
        let mut accounts: Vec<AccountRecord> = read_json(&path).await?;

        match accounts.iter_mut().find(|a| a.email == email) {
            Some(existing) => *existing = data.clone(),
            None => accounts.push(data.clone()),
        }
        atomic_write_json(&path, &accounts).await
    }

    async fn save_all_accounts(&self, accounts: &[AccountRecord]) -> PersistResult<()> {
        let _guard = self.accounts_lock.lock().await;
        atomic_write_json(&self.path(ACCOUNTS_FILE), accounts).await
    }

    async fn load_proxy_bindings(&self) -> PersistResult<BindingMap> {
        let _guard = self.bindings_lock.lock().await;
        read_json(&self.path(BINDINGS_FILE)).await
    }

    async fn save_proxy_binding(&self, email: &str, proxy_url: Option<&str>) -> PersistResult<()> {
        let _guard = self.bindings_lock.lock().await;
        let path = self.path(BINDINGS_FILE);
        let mut bindings: BindingMap = read_json(&path).await?;

        match proxy_url {
            Some(url) => {
                bindings.insert(email.to_string(), url.to_string());
            },
            None => {
                bindings.remove(email);
            },
        }
        atomic_write_json(&path, &bindings).await
    }

    async fn load_proxy_statuses(&self) -> PersistResult<ProxyStatusMap> {
        let _guard = self.statuses_lock.lock().await;
        read_json(&self.path(STATUSES_FILE)).await
    }

    async fn save_proxy_statuses(&self, statuses: &ProxyStatusMap) -> PersistResult<()> {
        let _guard = self.statuses_lock.lock().await;
        atomic_write_json(&self.path(STATUSES_FILE), statuses).await
    }

    async fn load_settings(&self) -> PersistResult<Settings> {
        let _guard = self.settings_lock.lock().await;
        read_json(&self.path(SETTINGS_FILE)).await
    }

    async fn save_setting(&self, key: &str, value: &str) -> PersistResult<()> {
        let _guard = self.settings_lock.lock().await;
        let path = self.path(SETTINGS_FILE);
        let mut settings: Settings = read_json(&path).await?;
        settings.insert(key.to_string(), value.to_string());
        atomic_write_json(&path, &settings).await
    }
}
