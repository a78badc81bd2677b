use anyhow::Result;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};

use qwenpool_core::proxy::GatewayContext;
use qwenpool_core::utils::http::redact_proxy_url;
use qwenpool_types::models::AccountRecord;

use crate::cli::AccountCommands;

pub async fn handle(context: &GatewayContext, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::List { json } => list_accounts(context, json).await,
        AccountCommands::Add { email, secret, cli } => {
            let record = if cli {
                AccountRecord::cli(email.trim(), secret)
            } else {
                AccountRecord::web(email.trim(), secret)
            };
            let email = record.email.clone();
            context.registry.add_account(record)?;
            println!("{} Account added: {}", "✓".green(), email);
            Ok(())
        },
        AccountCommands::Remove { email } => {
            context.registry.remove_account(&email).await?;
            println!("{} Account removed: {}", "✓".green(), email);
            Ok(())
        },
        AccountCommands::SetSecret { email, secret } => {
            context.registry.set_secret(&email, &secret)?;
            println!("{} Secret updated for {}", "✓".green(), email);
            Ok(())
        },
        AccountCommands::Reload => {
            let added = context.reload_accounts().await?;
            println!("{} Accounts reloaded: {} new", "✓".green(), added);
            Ok(())
        },
        AccountCommands::Login { email, identity } => {
            println!("{}", "Running device authorization...".cyan());
            let record = match context.registry.register_cli_account(&email, identity.as_deref()).await {
                Ok(record) => record,
                Err(e) if e.is_device_flow() => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("Device authorization for {} did not complete", email)));
                },
                Err(e) => return Err(e.into()),
            };
            println!("{} CLI account registered: {}", "✓".green(), record.email);
            Ok(())
        },
    }
}

async fn list_accounts(context: &GatewayContext, json: bool) -> Result<()> {
    let accounts = context.registry.list();
    let bindings = context.pool.bindings().await;

    if json {
        let rows: Vec<serde_json::Value> = accounts
            .iter()
            .map(|a| {
                serde_json::json!({
                    "email": a.email,
                    "kind": a.kind,
                    "token_expiry": a.token_expiry,
                    "unusable_reason": a.unusable_reason,
                    "proxy": bindings.get(&a.email).map(|u| redact_proxy_url(u)),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if accounts.is_empty() {
        println!("{}", "No accounts found.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Email", "Kind", "Token", "Proxy", "Status"]);

    let now = chrono::Utc::now().timestamp_millis();
    for account in &accounts {
        let token = if account.has_valid_token(now, 0) { "valid" } else { "expired" };
        let proxy =
            bindings.get(&account.email).map_or_else(|| "-".to_string(), |u| redact_proxy_url(u));
        let status = match &account.unusable_reason {
            Some(reason) => Cell::new(format!("Unusable: {}", reason)).fg(Color::Red),
            None => Cell::new("Active").fg(Color::Green),
        };
        table.add_row(vec![
            Cell::new(&account.email),
            Cell::new(account.kind.as_str()),
            Cell::new(token),
            Cell::new(proxy),
            status,
        ]);
    }

    println!("{table}");
    println!("\n{} accounts total", accounts.len());
    Ok(())
}
