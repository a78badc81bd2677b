//! Account registry: credential records, fair selection and serialized renewal.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::modules::oauth::CredentialLifecycle;
use crate::modules::persistence::PersistenceWriter;
use crate::proxy::proxy_pool::ProxyPool;
use qwenpool_types::error::AccountError;
use qwenpool_types::models::{AccountRecord, GatewayConfig};

/// Access token handed to the dispatcher together with the account it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountToken {
    pub email: String,
    pub access_token: String,
}

/// Owns every [`AccountRecord`] and decides which one serves the next request.
///
/// Renewal runs under a per-account lock: concurrent dispatches for the
/// same account wait for the single in-flight exchange instead of issuing
/// their own.
pub struct AccountRegistry {
    accounts: DashMap<String, AccountRecord>,
    refresh_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    cursor: AtomicUsize,
    lifecycle: Arc<CredentialLifecycle>,
    pool: Arc<ProxyPool>,
    writer: PersistenceWriter,
    refresh_margin_ms: i64,
    require_proxy: bool,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl AccountRegistry {
    pub fn new(
        accounts: Vec<AccountRecord>,
        lifecycle: Arc<CredentialLifecycle>,
        pool: Arc<ProxyPool>,
        writer: PersistenceWriter,
        config: &GatewayConfig,
    ) -> Self {
        let map = DashMap::new();
        for account in accounts {
            map.insert(account.email.clone(), account);
        }
        tracing::info!(accounts = map.len(), "Account registry loaded");
        Self {
            accounts: map,
            refresh_locks: DashMap::new(),
            cursor: AtomicUsize::new(0),
            lifecycle,
            pool,
            writer,
            refresh_margin_ms: config.refresh_margin_ms(),
            require_proxy: config.require_proxy,
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn get(&self, email: &str) -> Option<AccountRecord> {
        self.accounts.get(email).map(|r| r.value().clone())
    }

    /// All records, ordered by email.
    pub fn list(&self) -> Vec<AccountRecord> {
        let mut list: Vec<AccountRecord> = self.accounts.iter().map(|r| r.value().clone()).collect();
        list.sort_by(|a, b| a.email.cmp(&b.email));
        list
    }

    fn usable_emails(&self) -> Vec<String> {
        let mut emails: Vec<String> = self
            .accounts
            .iter()
            .filter(|r| r.value().is_usable())
            .map(|r| r.key().clone())
            .collect();
        emails.sort();
        emails
    }

    /// Pick the next account in round-robin order and return a valid token for it.
    ///
    /// Accounts whose renewal fails are skipped for this call; the error of
    /// the last candidate is reported when none succeeds.
    pub async fn get_account_token(&self) -> Result<AccountToken, AccountError> {
        let eligible = self.usable_emails();
        if eligible.is_empty() {
            return Err(AccountError::TokenUnavailable {
                reason: "no usable accounts registered".to_string(),
            });
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % eligible.len();
        let mut last_error: Option<AccountError> = None;

        for offset in 0..eligible.len() {
            let email = &eligible[(start + offset) % eligible.len()];
            match self.ensure_token(email).await {
                Ok(access_token) => {
                    return Ok(AccountToken { email: email.clone(), access_token });
                },
                Err(e) => {
                    tracing::warn!(email = %email, error = %e, "Account skipped");
                    last_error = Some(e);
                },
            }
        }

        Err(AccountError::TokenUnavailable {
            reason: last_error
                .map_or_else(|| "no account produced a token".to_string(), |e| e.to_string()),
        })
    }

    /// Valid access token for `email`, renewing it first when it is within
    /// the refresh margin of expiry.
    pub async fn ensure_token(&self, email: &str) -> Result<String, AccountError> {
        if let Some(token) = self.current_token(email)? {
            return Ok(token);
        }

        let lock = self
            .refresh_locks
            .entry(email.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another task may have renewed while we waited
        if let Some(token) = self.current_token(email)? {
            return Ok(token);
        }

        let account = self.get(email).ok_or_else(|| AccountError::NotFound { email: email.to_string() })?;
        let proxy = self.resolve_proxy(email).await?;

        tracing::debug!(email = %email, kind = account.kind.as_str(), "Renewing access token");
        match self.lifecycle.renew(&account, proxy.as_deref()).await {
            Ok(issued) => {
                let updated = {
                    let mut entry = self
                        .accounts
                        .get_mut(email)
                        .ok_or_else(|| AccountError::NotFound { email: email.to_string() })?;
                    entry.apply_token(&issued);
                    entry.clone()
                };
                self.writer.save_account(&updated);
                tracing::info!(email = %email, expiry = issued.expiry, "Access token renewed");
                Ok(issued.access_token)
            },
            Err(e) => {
                if e.should_mark_unusable() {
                    self.mark_unusable(email, &e.to_string());
                } else {
                    tracing::warn!(email = %email, error = %e, "Token renewal failed");
                }
                Err(e)
            },
        }
    }

    /// `Some(token)` when the stored token is valid past the margin.
    fn current_token(&self, email: &str) -> Result<Option<String>, AccountError> {
        let entry = self
            .accounts
            .get(email)
            .ok_or_else(|| AccountError::NotFound { email: email.to_string() })?;
        if let Some(reason) = &entry.unusable_reason {
            return Err(AccountError::Unusable { email: email.to_string(), reason: reason.clone() });
        }
        if entry.has_valid_token(now_ms(), self.refresh_margin_ms) {
            return Ok(entry.access_token.clone());
        }
        Ok(None)
    }

    /// Proxy that renewal traffic for `email` goes through.
    async fn resolve_proxy(&self, email: &str) -> Result<Option<String>, AccountError> {
        if let Some(url) = self.pool.binding_for(email).await {
            return Ok(Some(url));
        }
        match self.pool.assign_proxy(email, false).await {
            Ok(url) => Ok(Some(url)),
            Err(e) if self.require_proxy => {
                Err(AccountError::TokenUnavailable { reason: e.to_string() })
            },
            Err(_) => Ok(None),
        }
    }

    fn mark_unusable(&self, email: &str, reason: &str) {
        let updated = self.accounts.get_mut(email).map(|mut entry| {
            entry.unusable_reason = Some(reason.to_string());
            entry.clone()
        });
        if let Some(account) = updated {
            tracing::error!(email = %email, reason = %reason, "Account marked unusable");
            self.writer.save_account(&account);
        }
    }

    /// Register a new account. Existing emails are rejected.
    pub fn add_account(&self, account: AccountRecord) -> Result<(), AccountError> {
        use dashmap::mapref::entry::Entry;

        match self.accounts.entry(account.email.clone()) {
            Entry::Occupied(_) => Err(AccountError::AlreadyExists { email: account.email }),
            Entry::Vacant(slot) => {
                self.writer.save_account(&account);
                tracing::info!(email = %account.email, kind = account.kind.as_str(), "Account added");
                slot.insert(account);
                Ok(())
            },
        }
    }

    /// Drop an account together with its proxy binding.
    pub async fn remove_account(&self, email: &str) -> Result<AccountRecord, AccountError> {
        let (_, removed) = self
            .accounts
            .remove(email)
            .ok_or_else(|| AccountError::NotFound { email: email.to_string() })?;
        self.refresh_locks.remove(email);
        self.pool.unbind(email).await;
        self.writer.save_all_accounts(self.list());
        tracing::info!(email = %email, "Account removed");
        Ok(removed)
    }

    /// Replace the password or refresh token. Clears the unusable mark.
    pub fn set_secret(&self, email: &str, secret: &str) -> Result<(), AccountError> {
        let updated = {
            let mut entry = self
                .accounts
                .get_mut(email)
                .ok_or_else(|| AccountError::NotFound { email: email.to_string() })?;
            entry.rotate_secret(secret);
            entry.clone()
        };
        self.writer.save_account(&updated);
        tracing::info!(email = %email, "Account secret rotated");
        Ok(())
    }

    /// Insert declared accounts whose email is not registered yet.
    pub fn merge_declared(&self, declared: Vec<AccountRecord>) -> usize {
        let mut added = 0;
        for account in declared {
            if self.accounts.contains_key(&account.email) {
                continue;
            }
            self.accounts.insert(account.email.clone(), account);
            added += 1;
        }
        if added > 0 {
            self.writer.save_all_accounts(self.list());
            tracing::info!(added, "Declared accounts merged");
        }
        added
    }

    /// Run the device flow on behalf of a signed-in account and register the
    /// resulting CLI credential as `identity` (default `<email>#cli`).
    ///
    /// An existing record under that identity gets the new refresh token.
    pub async fn register_cli_account(
        &self,
        source_email: &str,
        identity: Option<&str>,
    ) -> Result<AccountRecord, AccountError> {
        let bearer = self.ensure_token(source_email).await?;
        let proxy = self.resolve_proxy(source_email).await?;

        let issued = self.lifecycle.init_cli_account(&bearer, proxy.as_deref()).await?;
        let refresh = issued.refresh_token.clone().ok_or_else(|| {
            AccountError::MissingRefreshToken { email: source_email.to_string() }
        })?;

        let identity = identity.map_or_else(|| format!("{}#cli", source_email), str::to_string);
        let mut record = AccountRecord::cli(identity.clone(), refresh);
        record.apply_token(&issued);

        self.accounts.insert(identity.clone(), record.clone());
        self.writer.save_account(&record);
        tracing::info!(email = %identity, source = %source_email, "CLI account registered");
        Ok(record)
    }
}

#[cfg(test)]
#[path = "account_registry_tests.rs"]
mod tests;
