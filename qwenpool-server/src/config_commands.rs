use anyhow::{anyhow, Result};
use colored::Colorize;

use qwenpool_core::modules::config as core_config;
use qwenpool_core::modules::persistence::PersistenceGateway;
use qwenpool_core::proxy::context::{SETTING_COOKIE_PRIMARY, SETTING_COOKIE_SECONDARY};
use qwenpool_core::proxy::GatewayContext;
use qwenpool_types::error::ConfigError;
use qwenpool_types::models::GatewayConfig;

use crate::cli::ConfigCommands;

/// Keys stored in `config.json`; anything else is a persisted setting.
const CONFIG_KEYS: &[&str] = &[
    "require_proxy",
    "log_level",
    "refresh_margin_secs",
    "upstream.chat_base_url",
    "upstream.oauth_base_url",
    "upstream.chat_timeout_secs",
    "probe.url",
    "probe.timeout_secs",
];

pub async fn handle(context: &GatewayContext, cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Show { json } => show_config(context, json).await,
        ConfigCommands::Set { key, value } => set_value(context, &key, &value),
    }
}

async fn show_config(context: &GatewayContext, json: bool) -> Result<()> {
    let settings = context.store.load_settings().await?;
    let config = &context.config;

    if json {
        let masked: serde_json::Map<String, serde_json::Value> = settings
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(mask_value(k, v))))
            .collect();
        let mut shown = config.clone();
        shown.session_cookies = None;
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "config": shown, "settings": masked }))?
        );
        return Ok(());
    }

    println!("{}", "Gateway Configuration:".cyan().bold());
    println!("  Chat API:      {}", config.upstream.chat_base_url);
    println!("  OAuth API:     {}", config.upstream.oauth_base_url);
    println!("  Chat timeout:  {}s", config.upstream.chat_timeout_secs);
    println!("  Probe:         {} (expect {})", config.probe.url, config.probe.expected_status);
    println!("  Require proxy: {}", config.require_proxy);
    println!("  Refresh margin: {}s", config.refresh_margin_secs);
    println!("  Sticky cookies: {}", if config.session_cookies.is_some() { "set" } else { "unset" });

    if !settings.is_empty() {
        println!("{}", "Settings:".cyan().bold());
        for (key, value) in &settings {
            println!("  {}: {}", key, mask_value(key, value));
        }
    }
    Ok(())
}

fn set_value(context: &GatewayContext, key: &str, value: &str) -> Result<()> {
    if CONFIG_KEYS.contains(&key) {
        core_config::update_config(&context.data_dir, |config| apply_config_key(config, key, value))?;
        println!("{} Config updated: {} = {}", "✓".green(), key, value);
        return Ok(());
    }

    if key.trim().is_empty() {
        return Err(anyhow!("Setting key must not be empty"));
    }
    context.save_setting(key, value);
    println!("{} Setting saved: {} = {}", "✓".green(), key, mask_value(key, value));
    Ok(())
}

fn apply_config_key(config: &mut GatewayConfig, key: &str, value: &str) -> Result<(), ConfigError> {
    let invalid = |message: String| ConfigError::ValidationError { field: key.to_string(), message };
    let parse_bool = || value.parse::<bool>().map_err(|_| invalid(format!("expected true/false, got {}", value)));
    let parse_u64 = || value.parse::<u64>().map_err(|_| invalid(format!("expected a number, got {}", value)));

    match key {
        "require_proxy" => config.require_proxy = parse_bool()?,
        "log_level" => config.log_level = value.to_string(),
        "refresh_margin_secs" => {
            config.refresh_margin_secs =
                value.parse::<i64>().map_err(|_| invalid(format!("expected a number, got {}", value)))?;
        },
        "upstream.chat_base_url" => config.upstream.chat_base_url = value.to_string(),
        "upstream.oauth_base_url" => config.upstream.oauth_base_url = value.to_string(),
        "upstream.chat_timeout_secs" => config.upstream.chat_timeout_secs = parse_u64()?,
        "probe.url" => config.probe.url = value.to_string(),
        "probe.timeout_secs" => config.probe.timeout_secs = parse_u64()?,
        other => return Err(invalid(format!("unknown config key {}", other))),
    }
    Ok(())
}

fn mask_value(key: &str, value: &str) -> String {
    if key != SETTING_COOKIE_PRIMARY && key != SETTING_COOKIE_SECONDARY {
        return value.to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
