use std::fs;
use std::path::Path;
use validator::Validate;

use qwenpool_types::error::ConfigError;
use qwenpool_types::models::GatewayConfig;

const CONFIG_FILE: &str = "config.json";

const ENV_CHAT_BASE_URL: &str = "QWENPOOL_CHAT_BASE_URL";
const ENV_OAUTH_BASE_URL: &str = "QWENPOOL_OAUTH_BASE_URL";
const ENV_REQUIRE_PROXY: &str = "QWENPOOL_REQUIRE_PROXY";
const ENV_LOG_LEVEL: &str = "QWENPOOL_LOG_LEVEL";

/// Load `config.json` from `data_dir`, apply environment overrides, validate.
///
/// A missing file yields defaults.
pub fn load_config(data_dir: &Path) -> Result<GatewayConfig, ConfigError> {
    let mut config = read_config_file(data_dir)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config)?;
    Ok(config)
}

/// Read-modify-write `config.json`. Environment overrides are not applied,
/// so they never leak into the file.
pub fn update_config<F>(data_dir: &Path, mutate: F) -> Result<GatewayConfig, ConfigError>
where
    F: FnOnce(&mut GatewayConfig) -> Result<(), ConfigError>,
{
    let mut config = read_config_file(data_dir)?;
    mutate(&mut config)?;
    save_config(data_dir, &config)?;
    Ok(config)
}

fn read_config_file(data_dir: &Path) -> Result<GatewayConfig, ConfigError> {
    let config_path = data_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(GatewayConfig::default());
    }
    let content = fs::read_to_string(&config_path)
        .map_err(|e| ConfigError::ParseError { message: format!("read failed: {}", e) })?;
    serde_json::from_str(&content).map_err(|e| ConfigError::from_json_error(&e))
}

/// Save the config atomically (temp file + rename).
pub fn save_config(data_dir: &Path, config: &GatewayConfig) -> Result<(), ConfigError> {
    validate_config(config)?;

    let config_path = data_dir.join(CONFIG_FILE);
    let temp_path = data_dir.join(format!("{}.tmp", CONFIG_FILE));

    let content =
        serde_json::to_string_pretty(config).map_err(|e| ConfigError::from_json_error(&e))?;

    fs::write(&temp_path, content).map_err(|e| ConfigError::from_io_error(&e))?;
    fs::rename(&temp_path, &config_path).map_err(|e| ConfigError::from_io_error(&e))
}

/// Overlay `QWENPOOL_*` values on top of the file config.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(url) = non_empty(ENV_CHAT_BASE_URL) {
        config.upstream.chat_base_url = url;
    }
    if let Some(url) = non_empty(ENV_OAUTH_BASE_URL) {
        config.upstream.oauth_base_url = url;
    }
    if let Some(flag) = non_empty(ENV_REQUIRE_PROXY) {
        config.require_proxy = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
    if let Some(level) = non_empty(ENV_LOG_LEVEL) {
        config.log_level = level;
    }
}

fn validate_config(config: &GatewayConfig) -> Result<(), ConfigError> {
    config.validate().map_err(|errors| {
        let field = errors
            .errors()
            .keys()
            .next()
            .map_or_else(|| "config".to_string(), |k| k.to_string());
        ConfigError::ValidationError { field, message: errors.to_string() }
    })
}
