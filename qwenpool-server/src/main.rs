//! Qwenpool CLI
//!
//! Bootstraps the gateway context from the data directory (config.json,
//! JSON state files, proxies.txt, accounts.txt) and runs one administrative
//! or dispatch command against it.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

mod account_commands;
mod cli;
mod commands;
mod config_commands;
mod proxy_commands;

use cli::Cli;
use qwenpool_core::modules::config::load_config;
use qwenpool_core::modules::logger::{init_logger, LogOptions};
use qwenpool_core::modules::persistence::{JsonFileStore, PersistenceGateway};
use qwenpool_core::proxy::GatewayContext;
use qwenpool_core::utils::paths::{ensure_dir, get_data_dir};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => ensure_dir(dir),
        None => get_data_dir(),
    }
    .map_err(anyhow::Error::msg)?;

    let mut config = load_config(&data_dir).context("Failed to load config.json")?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let _log_guard = init_logger(&LogOptions {
        level: config.log_level.clone(),
        log_dir: Some(data_dir.join("logs")),
        ansi: true,
    });
    tracing::debug!(data_dir = %data_dir.display(), "Starting qwenpool");

    let store: Arc<dyn PersistenceGateway> = Arc::new(JsonFileStore::new(data_dir.clone()));
    let context = GatewayContext::bootstrap(config, &data_dir, store, None)
        .await
        .context("Failed to initialize gateway state")?;

    let result = commands::run(&context, cli.command).await;
    context.shutdown().await;
    result
}
