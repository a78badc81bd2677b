use anyhow::{anyhow, Result};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};

use qwenpool_core::modules::declarations::parse_proxy_url;
use qwenpool_core::proxy::GatewayContext;
use qwenpool_core::utils::http::redact_proxy_url;
use qwenpool_types::error::ProxyError;
use qwenpool_types::models::ProxyStatus;

use crate::cli::ProxyCommands;

pub async fn handle(context: &GatewayContext, cmd: ProxyCommands) -> Result<()> {
    match cmd {
        ProxyCommands::List { json } => list_proxies(context, json).await,
        ProxyCommands::Add { url } => {
            let url = normalize(&url)?;
            if context.pool.add_proxy(&url).await {
                println!("{} Proxy added: {}", "✓".green(), redact_proxy_url(&url));
            } else {
                println!("{} Proxy already known: {}", "•".yellow(), redact_proxy_url(&url));
            }
            Ok(())
        },
        ProxyCommands::Remove { url } => {
            let url = normalize(&url)?;
            if !context.pool.remove_proxy(&url).await {
                return Err(unknown(&url).into());
            }
            println!("{} Proxy removed: {}", "✓".green(), redact_proxy_url(&url));
            Ok(())
        },
        ProxyCommands::Check { url: Some(url) } => {
            let url = normalize(&url)?;
            let status = context
                .pool
                .check_proxy(&url)
                .await
                .ok_or_else(|| unknown(&url))?;
            println!("{} {}", redact_proxy_url(&url), colored_status(status));
            Ok(())
        },
        ProxyCommands::Check { url: None } => {
            let results = context.pool.check_all().await;
            for (url, status) in &results {
                println!("{} {}", redact_proxy_url(url), colored_status(*status));
            }
            let ok = results.iter().filter(|(_, s)| *s == ProxyStatus::Available).count();
            println!("\n{}/{} proxies available", ok, results.len());
            Ok(())
        },
        ProxyCommands::Fail { url } => {
            let url = normalize(&url)?;
            if context.pool.status_of(&url).await.is_none() {
                return Err(unknown(&url).into());
            }
            if context.pool.mark_failed(&url).await {
                println!("{} Proxy marked failed: {}", "✓".green(), redact_proxy_url(&url));
            } else {
                println!("{} Proxy already failed: {}", "•".yellow(), redact_proxy_url(&url));
            }
            Ok(())
        },
        ProxyCommands::Reload => {
            let added = context.reload_proxies().await?;
            println!(
                "{} Proxies reloaded: {} new, all statuses reset to untested",
                "✓".green(),
                added
            );
            Ok(())
        },
    }
}

fn normalize(raw: &str) -> Result<String> {
    parse_proxy_url(raw).map_err(|e| anyhow!("Invalid proxy: {}", e))
}

fn unknown(url: &str) -> ProxyError {
    ProxyError::UnknownProxy { proxy: redact_proxy_url(url) }
}

fn colored_status(status: ProxyStatus) -> colored::ColoredString {
    match status {
        ProxyStatus::Available => status.as_str().green(),
        ProxyStatus::Untested => status.as_str().yellow(),
        ProxyStatus::Failed => status.as_str().red(),
    }
}

async fn list_proxies(context: &GatewayContext, json: bool) -> Result<()> {
    let proxies = context.pool.snapshot().await;

    if json {
        let redacted: Vec<serde_json::Value> = proxies
            .iter()
            .map(|p| {
                serde_json::json!({
                    "url": redact_proxy_url(&p.url),
                    "status": p.status,
                    "assigned_accounts": p.assigned_accounts,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&redacted)?);
        return Ok(());
    }

    if proxies.is_empty() {
        println!("{}", "No proxies configured.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Proxy", "Status", "Load", "Accounts"]);

    for proxy in &proxies {
        let status = match proxy.status {
            ProxyStatus::Available => Cell::new("available").fg(Color::Green),
            ProxyStatus::Untested => Cell::new("untested").fg(Color::Yellow),
            ProxyStatus::Failed => Cell::new("failed").fg(Color::Red),
        };
        let accounts = proxy.assigned_accounts.iter().cloned().collect::<Vec<_>>().join(", ");
        table.add_row(vec![
            Cell::new(redact_proxy_url(&proxy.url)),
            status,
            Cell::new(proxy.load()),
            Cell::new(if accounts.is_empty() { "-".to_string() } else { accounts }),
        ]);
    }

    println!("{table}");
    println!("\n{} proxies total", proxies.len());
    Ok(())
}
