//! Gateway configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

pub const DEFAULT_CHAT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

const DEFAULT_CHAT_BASE_URL: &str = "https://chat.qwen.ai";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const DEFAULT_PROBE_URL: &str = "https://www.google.com/generate_204";
const DEFAULT_OAUTH_CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";
const DEFAULT_OAUTH_SCOPE: &str = "openid profile email model.completion";

/// Root configuration, stored as `config.json` in the data directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct GatewayConfig {
    /// Upstream chat service endpoints and call limits
    #[serde(default)]
    #[validate(nested)]
    pub upstream: UpstreamConfig,
    /// Proxy health probe
    #[serde(default)]
    #[validate(nested)]
    pub probe: ProbeConfig,
    /// OAuth device flow parameters
    #[serde(default)]
    #[validate(nested)]
    pub oauth: OAuthConfig,
    /// Sticky-session cookie pair sent with completion calls
    #[serde(default)]
    pub session_cookies: Option<SessionCookies>,
    /// Refuse to dispatch when no proxy can be bound
    #[serde(default)]
    pub require_proxy: bool,
    /// Renew tokens this many seconds before they expire
    #[validate(range(min = 0_i64, max = 3600_i64))]
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: i64,
    /// Proxy declaration file, relative to the data directory
    #[validate(length(min = 1_u64))]
    #[serde(default = "default_proxies_file")]
    pub proxies_file: String,
    /// Account declaration file, relative to the data directory
    #[validate(length(min = 1_u64))]
    #[serde(default = "default_accounts_file")]
    pub accounts_file: String,
    /// Default tracing filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            probe: ProbeConfig::default(),
            oauth: OAuthConfig::default(),
            session_cookies: None,
            require_proxy: false,
            refresh_margin_secs: default_refresh_margin(),
            proxies_file: default_proxies_file(),
            accounts_file: default_accounts_file(),
            log_level: default_log_level(),
        }
    }
}

impl GatewayConfig {
    pub fn refresh_margin_ms(&self) -> i64 {
        self.refresh_margin_secs.saturating_mul(1000)
    }
}

/// Upstream chat API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct UpstreamConfig {
    /// Base url for session, completion and sign-in calls
    #[validate(url)]
    #[serde(default = "default_chat_base_url")]
    pub chat_base_url: String,
    /// Base url for device-code, authorize and token calls
    #[validate(url)]
    #[serde(default = "default_chat_base_url")]
    pub oauth_base_url: String,
    #[validate(length(min = 1_u64))]
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Timeout for session creation and completion calls
    #[validate(range(min = 1_u64, max = 600_u64))]
    #[serde(default = "default_chat_timeout")]
    pub chat_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            chat_base_url: default_chat_base_url(),
            oauth_base_url: default_chat_base_url(),
            user_agent: default_user_agent(),
            chat_timeout_secs: default_chat_timeout(),
        }
    }
}

/// Proxy health probe: one GET through the proxy, exact status expected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ProbeConfig {
    #[validate(url)]
    #[serde(default = "default_probe_url")]
    pub url: String,
    #[validate(range(min = 100_u16, max = 599_u16))]
    #[serde(default = "default_probe_status")]
    pub expected_status: u16,
    #[validate(range(min = 1_u64, max = 120_u64))]
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: default_probe_url(),
            expected_status: default_probe_status(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

/// OAuth device authorization parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct OAuthConfig {
    #[validate(length(min = 1_u64))]
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[validate(length(min = 1_u64))]
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Fixed delay between token polls
    #[validate(range(min = 1_u64, max = 60_u64))]
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[validate(range(min = 1_u32, max = 600_u32))]
    #[serde(default = "default_poll_attempts")]
    pub max_poll_attempts: u32,
    /// Timeout for each individual OAuth HTTP call
    #[validate(range(min = 1_u64, max = 300_u64))]
    #[serde(default = "default_oauth_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            scope: default_scope(),
            poll_interval_secs: default_poll_interval(),
            max_poll_attempts: default_poll_attempts(),
            request_timeout_secs: default_oauth_timeout(),
        }
    }
}

/// Sticky-session cookie pair carried on completion calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionCookies {
    pub primary: String,
    pub secondary: String,
}

impl SessionCookies {
    /// `Cookie` header value for the pair.
    pub fn header_value(&self) -> String {
        format!("ssxmod_itna={}; ssxmod_itna2={}", self.primary, self.secondary)
    }
}

fn default_chat_base_url() -> String {
    DEFAULT_CHAT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

const fn default_chat_timeout() -> u64 {
    DEFAULT_CHAT_TIMEOUT_SECS
}

fn default_probe_url() -> String {
    DEFAULT_PROBE_URL.to_string()
}

const fn default_probe_status() -> u16 {
    204
}

const fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

fn default_client_id() -> String {
    DEFAULT_OAUTH_CLIENT_ID.to_string()
}

fn default_scope() -> String {
    DEFAULT_OAUTH_SCOPE.to_string()
}

const fn default_poll_interval() -> u64 {
    5
}

const fn default_poll_attempts() -> u32 {
    60
}

const fn default_oauth_timeout() -> u64 {
    30
}

const fn default_refresh_margin() -> i64 {
    300
}

fn default_proxies_file() -> String {
    "proxies.txt".to_string()
}

fn default_accounts_file() -> String {
    "accounts.txt".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
