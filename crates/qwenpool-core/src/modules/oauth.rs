//! Credential lifecycle: OAuth device authorization (PKCE), refresh-token
//! exchange, and password sign-in for web accounts.
//!
//! Nothing here panics or leaks a transport error past its boundary: every
//! operation returns an [`AccountError`].

use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use sha2::Digest;
use std::sync::Arc;
use std::time::Duration;

use crate::proxy::upstream::ClientCache;
use crate::utils::http::{redact_proxy_url, truncate_body};
use qwenpool_types::error::AccountError;
use qwenpool_types::models::{AccountKind, AccountRecord, GatewayConfig, IssuedToken, OAuthConfig};

const DEVICE_CODE_PATH: &str = "/api/v1/oauth2/device/code";
const AUTHORIZE_PATH: &str = "/api/v2/oauth2/authorize";
const TOKEN_PATH: &str = "/api/v1/oauth2/token";
const SIGN_IN_PATH: &str = "/api/v1/auths/signin";

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const SIGN_IN_FALLBACK_TTL_MS: i64 = 24 * 60 * 60 * 1000;
const ERROR_BODY_LIMIT: usize = 300;

/// 32 random bytes, base64url without padding: 43 characters.
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// `BASE64URL(SHA256(verifier))`, method `S256`.
pub fn code_challenge_s256(verifier: &str) -> String {
    let digest = sha2::Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Lowercase hex SHA-256, the password form the sign-in endpoint expects.
pub fn sha256_hex(input: &str) -> String {
    sha2::Sha256::digest(input.as_bytes()).iter().map(|b| format!("{:02x}", b)).collect()
}

/// Expiry (Unix ms) from a JWT `exp` claim, if the token carries one.
pub fn jwt_expiry_ms(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_i64().map(|exp| exp.saturating_mul(1000))
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One device-flow login attempt. Discarded after success or exhaustion.
#[derive(Debug, Clone)]
pub struct DeviceFlowSession {
    pub code_verifier: String,
    pub code_challenge: String,
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: Option<String>,
    pub expires_in: Option<i64>,
}

/// Fixed-interval polling with a hard attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn from_config(oauth: &OAuthConfig) -> Self {
        Self {
            interval: Duration::from_secs(oauth.poll_interval_secs),
            max_attempts: oauth.max_poll_attempts,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    #[serde(default)]
    verification_uri: Option<String>,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

const fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
struct SignInResponse {
    token: String,
}

/// OAuth and sign-in client. Stateless apart from its configuration; each
/// call routes through the proxy it is given.
pub struct CredentialLifecycle {
    clients: Arc<ClientCache>,
    chat_base_url: String,
    oauth_base_url: String,
    oauth: OAuthConfig,
    request_timeout: Duration,
    poll: PollPolicy,
}

impl CredentialLifecycle {
    pub fn new(clients: Arc<ClientCache>, config: &GatewayConfig) -> Self {
        Self {
            clients,
            chat_base_url: config.upstream.chat_base_url.trim_end_matches('/').to_string(),
            oauth_base_url: config.upstream.oauth_base_url.trim_end_matches('/').to_string(),
            oauth: config.oauth.clone(),
            request_timeout: Duration::from_secs(config.oauth.request_timeout_secs),
            poll: PollPolicy::from_config(&config.oauth),
        }
    }

    /// Override the polling cadence (tests use millisecond intervals).
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    async fn client(&self, proxy: Option<&str>) -> Result<Client, String> {
        self.clients.client_for(proxy).await.map_err(|e| e.to_string())
    }

    /// Request a device code for a fresh PKCE pair.
    pub async fn initiate_device_flow(
        &self,
        proxy: Option<&str>,
    ) -> Result<DeviceFlowSession, AccountError> {
        let fail = |message: String| AccountError::DeviceFlowFailed {
            stage: "device_code".to_string(),
            message,
        };

        let code_verifier = generate_code_verifier();
        let code_challenge = code_challenge_s256(&code_verifier);
        let client = self.client(proxy).await.map_err(fail)?;

        let response = client
            .post(format!("{}{}", self.oauth_base_url, DEVICE_CODE_PATH))
            .timeout(self.request_timeout)
            .form(&[
                ("client_id", self.oauth.client_id.as_str()),
                ("scope", self.oauth.scope.as_str()),
                ("code_challenge", code_challenge.as_str()),
                ("code_challenge_method", "S256"),
            ])
            .send()
            .await
            .map_err(|e| fail(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(fail(format!("HTTP {}: {}", status, truncate_body(&body, ERROR_BODY_LIMIT))));
        }

        let data: DeviceCodeResponse =
            response.json().await.map_err(|e| fail(format!("invalid response: {}", e)))?;

        tracing::info!(
            user_code = %data.user_code,
            verification_uri = data.verification_uri.as_deref().unwrap_or("-"),
            "Device code issued"
        );

        Ok(DeviceFlowSession {
            code_verifier,
            code_challenge,
            device_code: data.device_code,
            user_code: data.user_code,
            verification_uri: data.verification_uri_complete.or(data.verification_uri),
            expires_in: data.expires_in,
        })
    }

    /// Approve `user_code` with an already signed-in bearer token.
    pub async fn authorize_login(
        &self,
        user_code: &str,
        bearer_token: &str,
        proxy: Option<&str>,
    ) -> bool {
        let client = match self.client(proxy).await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(error = %e, "Device authorization skipped: no client");
                return false;
            },
        };

        let result = client
            .post(format!("{}{}", self.oauth_base_url, AUTHORIZE_PATH))
            .timeout(self.request_timeout)
            .bearer_auth(bearer_token)
            .json(&serde_json::json!({ "approved": true, "user_code": user_code }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!(user_code = %user_code, "Device code approved");
                true
            },
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Device authorization rejected");
                false
            },
            Err(e) => {
                tracing::warn!(error = %e, "Device authorization request failed");
                false
            },
        }
    }

    /// Poll the token endpoint at a fixed interval until a token is issued
    /// or the attempt ceiling is reached.
    ///
    /// Every non-success outcome, transport errors included, consumes one
    /// attempt. The future is cancel-safe: dropping it stops polling.
    pub async fn poll_for_token(
        &self,
        device_code: &str,
        code_verifier: &str,
        proxy: Option<&str>,
    ) -> Result<IssuedToken, AccountError> {
        let client = self.client(proxy).await.map_err(|message| {
            AccountError::DeviceFlowFailed { stage: "poll".to_string(), message }
        })?;
        let url = format!("{}{}", self.oauth_base_url, TOKEN_PATH);

        for attempt in 1..=self.poll.max_attempts {
            let result = client
                .post(&url)
                .timeout(self.request_timeout)
                .form(&[
                    ("grant_type", DEVICE_CODE_GRANT),
                    ("client_id", self.oauth.client_id.as_str()),
                    ("device_code", device_code),
                    ("code_verifier", code_verifier),
                ])
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    match response.json::<TokenResponse>().await {
                        Ok(data) => {
                            tracing::info!(attempt, "Device flow token issued");
                            return Ok(IssuedToken::from_expires_in(
                                data.access_token,
                                data.refresh_token.filter(|t| !t.is_empty()),
                                data.expires_in,
                                now_ms(),
                            ));
                        },
                        Err(e) => {
                            tracing::debug!(attempt, error = %e, "Token poll returned bad payload");
                        },
                    }
                },
                Ok(response) => {
                    tracing::debug!(attempt, status = %response.status(), "Token not issued yet");
                },
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "Token poll request failed");
                },
            }

            if attempt < self.poll.max_attempts {
                tokio::time::sleep(self.poll.interval).await;
            }
        }

        tracing::warn!(attempts = self.poll.max_attempts, "Device flow polling exhausted");
        Err(AccountError::DeviceFlowTimedOut { attempts: self.poll.max_attempts })
    }

    /// Device code → approval → token, stopping at the first failed stage.
    pub async fn init_cli_account(
        &self,
        bearer_token: &str,
        proxy: Option<&str>,
    ) -> Result<IssuedToken, AccountError> {
        let session = self.initiate_device_flow(proxy).await?;

        if !self.authorize_login(&session.user_code, bearer_token, proxy).await {
            return Err(AccountError::DeviceFlowFailed {
                stage: "authorize".to_string(),
                message: format!("user code {} was not approved", session.user_code),
            });
        }

        let token = self.poll_for_token(&session.device_code, &session.code_verifier, proxy).await?;
        if token.refresh_token.is_none() {
            return Err(AccountError::DeviceFlowFailed {
                stage: "poll".to_string(),
                message: "token response carried no refresh token".to_string(),
            });
        }
        Ok(token)
    }

    /// Exchange the account's refresh token for a new token pair.
    ///
    /// The old refresh token is kept when the response omits a new one.
    pub async fn refresh_access_token(
        &self,
        account: &AccountRecord,
        proxy: Option<&str>,
    ) -> Result<IssuedToken, AccountError> {
        let refresh_token = account
            .refresh_token()
            .ok_or_else(|| AccountError::MissingRefreshToken { email: account.email.clone() })?;

        let client = self
            .client(proxy)
            .await
            .map_err(|reason| AccountError::TokenUnavailable { reason })?;

        tracing::debug!(
            email = %account.email,
            proxy = %proxy.map_or_else(|| "direct".to_string(), redact_proxy_url),
            "Refreshing access token"
        );

        let response = client
            .post(format!("{}{}", self.oauth_base_url, TOKEN_PATH))
            .timeout(self.request_timeout)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.oauth.client_id.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| AccountError::TokenUnavailable {
                reason: format!("refresh request for {} failed: {}", account.email, e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AccountError::RefreshFailed {
                email: account.email.clone(),
                message: format!("HTTP {}: {}", status, truncate_body(&body, ERROR_BODY_LIMIT)),
            });
        }

        let data: TokenResponse = response.json().await.map_err(|e| AccountError::RefreshFailed {
            email: account.email.clone(),
            message: format!("invalid token response: {}", e),
        })?;

        let rotated = data.refresh_token.filter(|t| !t.is_empty());
        Ok(IssuedToken::from_expires_in(
            data.access_token,
            Some(rotated.unwrap_or_else(|| refresh_token.to_string())),
            data.expires_in,
            now_ms(),
        ))
    }

    /// Password sign-in for web accounts.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        proxy: Option<&str>,
    ) -> Result<IssuedToken, AccountError> {
        let client = self
            .client(proxy)
            .await
            .map_err(|reason| AccountError::TokenUnavailable { reason })?;

        let response = client
            .post(format!("{}{}", self.chat_base_url, SIGN_IN_PATH))
            .timeout(self.request_timeout)
            .json(&serde_json::json!({ "email": email, "password": sha256_hex(password) }))
            .send()
            .await
            .map_err(|e| AccountError::TokenUnavailable {
                reason: format!("sign-in request for {} failed: {}", email, e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AccountError::RefreshFailed {
                email: email.to_string(),
                message: format!("sign-in HTTP {}: {}", status, truncate_body(&body, ERROR_BODY_LIMIT)),
            });
        }

        let data: SignInResponse = response.json().await.map_err(|e| AccountError::RefreshFailed {
            email: email.to_string(),
            message: format!("invalid sign-in response: {}", e),
        })?;

        let now = now_ms();
        let expiry = jwt_expiry_ms(&data.token).unwrap_or(now + SIGN_IN_FALLBACK_TTL_MS);
        tracing::info!(email = %email, "Signed in");
        Ok(IssuedToken { access_token: data.token, refresh_token: None, expiry })
    }

    /// Renew by whatever means the account kind supports.
    pub async fn renew(
        &self,
        account: &AccountRecord,
        proxy: Option<&str>,
    ) -> Result<IssuedToken, AccountError> {
        match account.kind {
            AccountKind::Web => self.sign_in(&account.email, &account.secret, proxy).await,
            AccountKind::Cli => self.refresh_access_token(account, proxy).await,
        }
    }
}

#[cfg(test)]
#[path = "oauth_tests.rs"]
mod oauth_tests;
