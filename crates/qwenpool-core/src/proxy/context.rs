//! Explicitly constructed gateway context: every shared component, wired once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::AppResult;
use crate::modules::declarations::{parse_account_list, parse_proxy_list, read_declaration_file};
use crate::modules::oauth::CredentialLifecycle;
use crate::modules::persistence::{PersistedState, PersistenceGateway, PersistenceWriter, Settings};
use crate::proxy::account_registry::AccountRegistry;
use crate::proxy::dispatcher::Dispatcher;
use crate::proxy::proxy_pool::{HttpProxyProber, ProxyPool, ProxyProber, ReassignReason};
use crate::proxy::upstream::ClientCache;
use crate::utils::http::redact_proxy_url;
use qwenpool_types::error::ConfigError;
use qwenpool_types::models::{AccountRecord, GatewayConfig, ProxyStatus, SessionCookies};

pub const SETTING_COOKIE_PRIMARY: &str = "session_cookie_primary";
pub const SETTING_COOKIE_SECONDARY: &str = "session_cookie_secondary";

/// One account touched by a rebalance and where it ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassignment {
    pub email: String,
    pub reason: ReassignReason,
    /// New binding, `None` when the pool had nothing to offer
    pub proxy: Option<String>,
}

pub struct GatewayContext {
    pub config: GatewayConfig,
    pub data_dir: PathBuf,
    pub store: Arc<dyn PersistenceGateway>,
    pub writer: PersistenceWriter,
    pub clients: Arc<ClientCache>,
    pub pool: Arc<ProxyPool>,
    pub lifecycle: Arc<CredentialLifecycle>,
    pub registry: Arc<AccountRegistry>,
    pub dispatcher: Dispatcher,
}

/// Cookie pair from persisted settings, when both halves are set.
fn cookies_from_settings(settings: &Settings) -> Option<SessionCookies> {
    let primary = settings.get(SETTING_COOKIE_PRIMARY).filter(|v| !v.is_empty())?;
    let secondary = settings.get(SETTING_COOKIE_SECONDARY).filter(|v| !v.is_empty())?;
    Some(SessionCookies { primary: primary.clone(), secondary: secondary.clone() })
}

impl GatewayContext {
    /// Load persisted state, merge declaration files, restore and rebalance
    /// the pool, then build the registry and dispatcher on top.
    ///
    /// Fails only when the store cannot be read or the HTTP stack cannot be
    /// built; malformed declarations are logged and skipped.
    pub async fn bootstrap(
        mut config: GatewayConfig,
        data_dir: &Path,
        store: Arc<dyn PersistenceGateway>,
        prober: Option<Arc<dyn ProxyProber>>,
    ) -> AppResult<Self> {
        let mut state = PersistedState::load(store.as_ref()).await.map_err(|e| {
            tracing::error!(error = %e, "Persistence backend unreadable at startup");
            e
        })?;

        if let Some(cookies) = cookies_from_settings(&state.settings) {
            tracing::debug!("Session cookies loaded from settings");
            config.session_cookies = Some(cookies);
        }

        let clients = Arc::new(ClientCache::new(config.upstream.user_agent.clone()).map_err(
            |message| ConfigError::ValidationError { field: "upstream.user_agent".to_string(), message },
        )?);
        let writer = PersistenceWriter::spawn(store.clone());
        let prober = prober.unwrap_or_else(|| {
            Arc::new(HttpProxyProber::new(clients.clone(), &config.probe)) as Arc<dyn ProxyProber>
        });

        let declared_proxies = read_proxy_declarations(&data_dir.join(&config.proxies_file)).await?;
        let mut new_proxies = 0usize;
        for url in declared_proxies {
            if !state.statuses.contains_key(&url) {
                state.statuses.insert(url, ProxyStatus::Untested);
                new_proxies += 1;
            }
        }
        if new_proxies > 0 {
            tracing::info!(added = new_proxies, "Declared proxies merged");
            writer.save_proxy_statuses(state.statuses.clone());
        }

        let declared_accounts =
            read_account_declarations(&data_dir.join(&config.accounts_file)).await?;
        let mut new_accounts = 0usize;
        for account in declared_accounts {
            if state.accounts.iter().all(|a| a.email != account.email) {
                state.accounts.push(account);
                new_accounts += 1;
            }
        }
        if new_accounts > 0 {
            tracing::info!(added = new_accounts, "Declared accounts merged");
            writer.save_all_accounts(state.accounts.clone());
        }

        let pool = Arc::new(ProxyPool::restore(
            state.statuses,
            state.bindings,
            prober,
            writer.clone(),
            clients.clone(),
        ));
        let lifecycle = Arc::new(CredentialLifecycle::new(clients.clone(), &config));
        let registry = Arc::new(AccountRegistry::new(
            state.accounts,
            lifecycle.clone(),
            pool.clone(),
            writer.clone(),
            &config,
        ));
        let dispatcher = Dispatcher::new(registry.clone(), pool.clone(), clients.clone(), &config);

        let context = Self {
            config,
            data_dir: data_dir.to_path_buf(),
            store,
            writer,
            clients,
            pool,
            lifecycle,
            registry,
            dispatcher,
        };
        context.rebalance().await;
        Ok(context)
    }

    /// Validate bindings and re-assign every registered account the
    /// rebalance released.
    pub async fn rebalance(&self) -> Vec<Reassignment> {
        let released = self.pool.validate_and_rebalance_bindings().await;
        let mut outcome = Vec::with_capacity(released.len());

        for (email, reason) in released {
            if self.registry.get(&email).is_none() {
                tracing::debug!(email = %email, reason = %reason, "Released binding of unknown account");
                continue;
            }
            let proxy = self.pool.assign_proxy(&email, false).await.ok();
            tracing::info!(
                email = %email,
                reason = %reason,
                proxy = %proxy.as_deref().map_or_else(|| "none".to_string(), redact_proxy_url),
                "Binding reassigned"
            );
            outcome.push(Reassignment { email, reason, proxy });
        }
        outcome
    }

    /// Re-read the proxies file: new proxies are added and every status is
    /// reset to `untested`. Returns how many proxies were new.
    pub async fn reload_proxies(&self) -> AppResult<usize> {
        let urls = read_proxy_declarations(&self.data_dir.join(&self.config.proxies_file)).await?;
        Ok(self.pool.reload(&urls).await)
    }

    /// Re-read the accounts file and register emails not seen before.
    pub async fn reload_accounts(&self) -> AppResult<usize> {
        let accounts =
            read_account_declarations(&self.data_dir.join(&self.config.accounts_file)).await?;
        Ok(self.registry.merge_declared(accounts))
    }

    /// Persist a setting. Cookie settings apply from the next bootstrap.
    pub fn save_setting(&self, key: &str, value: &str) {
        self.writer.save_setting(key, value);
    }

    /// Wait for every queued persistence write.
    pub async fn shutdown(&self) {
        self.writer.flush().await;
    }
}

async fn read_proxy_declarations(path: &Path) -> AppResult<Vec<String>> {
    let Some(text) = read_declaration_file(path).await? else {
        return Ok(Vec::new());
    };
    let parsed = parse_proxy_list(&text);
    for rejected in &parsed.rejected {
        tracing::warn!(file = %path.display(), error = %rejected, "Proxy declaration skipped");
    }
    Ok(parsed.entries)
}

async fn read_account_declarations(path: &Path) -> AppResult<Vec<AccountRecord>> {
    let Some(text) = read_declaration_file(path).await? else {
        return Ok(Vec::new());
    };
    let parsed = parse_account_list(&text);
    for rejected in &parsed.rejected {
        tracing::warn!(file = %path.display(), error = %rejected, "Account declaration skipped");
    }
    Ok(parsed.entries)
}
