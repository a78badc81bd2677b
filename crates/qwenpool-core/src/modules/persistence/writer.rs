//! Write-behind queue in front of a [`PersistenceGateway`].
//!
//! Producers enqueue without awaiting; one spawned task applies writes in
//! order. Failures are logged and dropped: the in-memory state stays
//! authoritative and the next snapshot overwrites whatever was missed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{PersistResult, PersistenceGateway, ProxyStatusMap};
use qwenpool_types::models::AccountRecord;

const RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug)]
enum WriteOp {
    ProxyStatuses(ProxyStatusMap),
    Binding { email: String, proxy_url: Option<String> },
    Account(Box<AccountRecord>),
    AllAccounts(Vec<AccountRecord>),
    Setting { key: String, value: String },
    Flush(oneshot::Sender<()>),
}

impl WriteOp {
    const fn label(&self) -> &'static str {
        match self {
            Self::ProxyStatuses(_) => "proxy statuses",
            Self::Binding { .. } => "proxy binding",
            Self::Account(_) => "account",
            Self::AllAccounts(_) => "account list",
            Self::Setting { .. } => "setting",
            Self::Flush(_) => "flush",
        }
    }
}

/// Cloneable handle to the writer task.
#[derive(Clone)]
pub struct PersistenceWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
    _handle: Arc<JoinHandle<()>>,
}

impl PersistenceWriter {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn PersistenceGateway>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(writer_loop(store, rx));
        Self { tx, _handle: Arc::new(handle) }
    }

    pub fn save_proxy_statuses(&self, statuses: ProxyStatusMap) {
        self.enqueue(WriteOp::ProxyStatuses(statuses));
    }

    pub fn save_proxy_binding(&self, email: &str, proxy_url: Option<&str>) {
        self.enqueue(WriteOp::Binding {
            email: email.to_string(),
            proxy_url: proxy_url.map(str::to_string),
        });
    }

    pub fn save_account(&self, account: &AccountRecord) {
        self.enqueue(WriteOp::Account(Box::new(account.clone())));
    }

    pub fn save_all_accounts(&self, accounts: Vec<AccountRecord>) {
        self.enqueue(WriteOp::AllAccounts(accounts));
    }

    pub fn save_setting(&self, key: &str, value: &str) {
        self.enqueue(WriteOp::Setting { key: key.to_string(), value: value.to_string() });
    }

    /// Wait until every write queued before this call has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteOp::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    fn enqueue(&self, op: WriteOp) {
        let label = op.label();
        if self.tx.send(op).is_err() {
            tracing::error!(op = label, "Persistence writer stopped, write dropped");
        }
    }
}

async fn writer_loop(store: Arc<dyn PersistenceGateway>, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        if let WriteOp::Flush(done) = op {
            let _ = done.send(());
            continue;
        }

        let label = op.label();
        if let Err(first) = apply(store.as_ref(), &op).await {
            tracing::warn!(op = label, error = %first, "Persistence write failed, retrying once");
            tokio::time::sleep(RETRY_DELAY).await;
            if let Err(e) = apply(store.as_ref(), &op).await {
                tracing::error!(op = label, error = %e, "Persistence write dropped");
            }
        }
    }
    tracing::debug!("Persistence writer exiting");
}

async fn apply(store: &dyn PersistenceGateway, op: &WriteOp) -> PersistResult<()> {
    match op {
        WriteOp::ProxyStatuses(statuses) => store.save_proxy_statuses(statuses).await,
        WriteOp::Binding { email, proxy_url } => {
            store.save_proxy_binding(email, proxy_url.as_deref()).await
        },
        WriteOp::Account(account) => store.save_account(&account.email, account).await,
        WriteOp::AllAccounts(accounts) => store.save_all_accounts(accounts).await,
        WriteOp::Setting { key, value } => store.save_setting(key, value).await,
        WriteOp::Flush(_) => Ok(()),
    }
}
