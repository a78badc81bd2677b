//! Chat dispatch: account and proxy resolution, upstream session creation,
//! the completion call, and failure handling.
//!
//! A dispatch never retries. A transport failure while a proxy is bound
//! marks that proxy failed and rebinds the account before the error is
//! returned, so the caller's next attempt already uses the new proxy.

mod classify;
mod session;

pub use classify::{is_transport_error, matches_transport_signature};

use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::proxy::account_registry::AccountRegistry;
use crate::proxy::proxy_pool::ProxyPool;
use crate::proxy::upstream::ClientCache;
use crate::utils::http::redact_proxy_url;
use classify::CallFailure;
use qwenpool_types::error::{AccountError, ProxyError};
use qwenpool_types::models::{GatewayConfig, SessionCookies};

/// Upstream call a dispatch failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    Session,
    Completion,
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Session => "session creation",
            Self::Completion => "completion",
        })
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request body lacks what a dispatch needs
    #[error("Invalid chat request: {0}")]
    InvalidRequest(String),

    /// No account could produce a token; no upstream call was made
    #[error(transparent)]
    TokenUnavailable(#[from] AccountError),

    /// Proxy required but none could be bound
    #[error("No proxy available for {email}")]
    NoProxy { email: String },

    /// HTTP client for the bound proxy could not be built
    #[error(transparent)]
    Client(#[from] ProxyError),

    /// Transport-class failure; the bound proxy was failed and replaced
    #[error("Network failure during {stage} for {email}: {message}")]
    Network {
        stage: DispatchStage,
        email: String,
        /// Redacted url of the proxy the call went through
        proxy: Option<String>,
        message: String,
        /// Raw url of the replacement binding, if reassignment succeeded
        reassigned_to: Option<String>,
    },

    /// Upstream answered, but not with something usable
    #[error("Upstream rejected {stage} for {email}: {message}")]
    Upstream { stage: DispatchStage, email: String, status: Option<u16>, message: String },
}

impl DispatchError {
    pub fn stage(&self) -> Option<DispatchStage> {
        match self {
            Self::Network { stage, .. } | Self::Upstream { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// One chat-completion request as submitted by a client.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub stream: bool,
    /// Client payload, forwarded as the completion body
    pub body: Value,
}

impl ChatRequest {
    /// Read `model` and the optional `stream` flag out of a client payload.
    pub fn from_body(body: Value) -> Result<Self, DispatchError> {
        let model = body
            .get("model")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| DispatchError::InvalidRequest("missing model".to_string()))?
            .to_string();
        let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
        Ok(Self { model, stream, body })
    }

    /// Single user message.
    pub fn user_prompt(model: &str, prompt: &str, stream: bool) -> Self {
        let body = serde_json::json!({
            "model": model,
            "stream": stream,
            "messages": [{ "role": "user", "content": prompt }],
        });
        Self { model: model.to_string(), stream, body }
    }

    /// Completion payload with the stream flag made explicit.
    fn upstream_body(&self) -> Value {
        let mut body = self.body.clone();
        if let Some(map) = body.as_object_mut() {
            map.insert("stream".to_string(), Value::Bool(self.stream));
        }
        body
    }
}

/// Completion payload: buffered json or the raw byte stream.
pub enum ChatBody {
    Json(Value),
    Stream(BoxStream<'static, Result<Bytes, reqwest::Error>>),
}

impl fmt::Debug for ChatBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Successful dispatch.
#[derive(Debug)]
pub struct ChatCompletion {
    /// Account that served the request
    pub account: String,
    /// Proxy the request went through, if any
    pub proxy: Option<String>,
    pub chat_id: String,
    pub body: ChatBody,
}

pub struct Dispatcher {
    registry: Arc<AccountRegistry>,
    pool: Arc<ProxyPool>,
    clients: Arc<ClientCache>,
    chat_base_url: String,
    timeout: Duration,
    cookies: Option<SessionCookies>,
    require_proxy: bool,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<AccountRegistry>,
        pool: Arc<ProxyPool>,
        clients: Arc<ClientCache>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            registry,
            pool,
            clients,
            chat_base_url: config.upstream.chat_base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.upstream.chat_timeout_secs),
            cookies: config.session_cookies.clone(),
            require_proxy: config.require_proxy,
        }
    }

    /// Run one chat request end to end.
    ///
    /// The session call happens first; if it fails no completion call is
    /// issued, so one logical request never costs the account twice.
    pub async fn send_chat_request(
        &self,
        request: ChatRequest,
    ) -> Result<ChatCompletion, DispatchError> {
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let request_id = &request_id[..8];
        let token = self.registry.get_account_token().await?;
        let email = token.email;
        let proxy = self.resolve_proxy(&email).await?;
        let client = self.clients.client_for(proxy.as_deref()).await?;
        let headers = session::build_headers(&token.access_token, self.cookies.as_ref())
            .map_err(DispatchError::InvalidRequest)?;

        tracing::debug!(
            request_id,
            email = %email,
            proxy = %proxy.as_deref().map_or_else(|| "direct".to_string(), redact_proxy_url),
            model = %request.model,
            stream = request.stream,
            "Dispatching chat request"
        );

        let chat_id = match self.create_session(&client, headers.clone(), &request.model).await {
            Ok(id) => id,
            Err(failure) => {
                return Err(self.fail(DispatchStage::Session, &email, proxy, failure).await);
            },
        };

        match self.complete(&client, headers, &chat_id, &request).await {
            Ok(body) => {
                tracing::info!(
                    request_id,
                    email = %email,
                    chat_id = %chat_id,
                    model = %request.model,
                    "Chat completed"
                );
                Ok(ChatCompletion { account: email, proxy, chat_id, body })
            },
            Err(failure) => Err(self.fail(DispatchStage::Completion, &email, proxy, failure).await),
        }
    }

    async fn resolve_proxy(&self, email: &str) -> Result<Option<String>, DispatchError> {
        if let Some(url) = self.pool.binding_for(email).await {
            return Ok(Some(url));
        }
        match self.pool.assign_proxy(email, false).await {
            Ok(url) => Ok(Some(url)),
            Err(_) if self.require_proxy => Err(DispatchError::NoProxy { email: email.to_string() }),
            Err(_) => {
                tracing::warn!(email = %email, "No proxy bound, dispatching direct");
                Ok(None)
            },
        }
    }

    /// Turn a call failure into the returned error, reassigning first when
    /// the failure is transport-class and a proxy was bound.
    async fn fail(
        &self,
        stage: DispatchStage,
        email: &str,
        proxy: Option<String>,
        failure: CallFailure,
    ) -> DispatchError {
        let redacted = proxy.as_deref().map(redact_proxy_url);
        match failure {
            CallFailure::Transport(message) => {
                tracing::warn!(
                    email = %email,
                    proxy = redacted.as_deref().unwrap_or("direct"),
                    stage = %stage,
                    error = %message,
                    "Transport failure"
                );
                let reassigned_to = match proxy.as_deref() {
                    Some(url) => self.reassign(email, url).await,
                    None => None,
                };
                DispatchError::Network {
                    stage,
                    email: email.to_string(),
                    proxy: redacted,
                    message,
                    reassigned_to,
                }
            },
            CallFailure::Status { status, body } => {
                tracing::warn!(email = %email, stage = %stage, status, "Upstream returned error status");
                DispatchError::Upstream { stage, email: email.to_string(), status: Some(status), message: body }
            },
            CallFailure::Malformed(message) => {
                tracing::warn!(email = %email, stage = %stage, error = %message, "Upstream payload unusable");
                DispatchError::Upstream { stage, email: email.to_string(), status: None, message }
            },
        }
    }

    async fn reassign(&self, email: &str, failed_url: &str) -> Option<String> {
        match self.pool.reassign_after_failure(email, failed_url).await {
            Ok(url) => {
                tracing::info!(
                    email = %email,
                    from = %redact_proxy_url(failed_url),
                    to = %redact_proxy_url(&url),
                    "Account reassigned after transport failure"
                );
                Some(url)
            },
            Err(e) => {
                tracing::warn!(email = %email, error = %e, "Reassignment found no replacement proxy");
                None
            },
        }
    }
}
