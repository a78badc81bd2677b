use anyhow::{Context, Result};
use colored::Colorize;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use qwenpool_core::proxy::{ChatBody, ChatRequest, GatewayContext};
use qwenpool_types::models::ProxyStatus;

use crate::cli::Commands;
use crate::{account_commands, config_commands, proxy_commands};

pub async fn run(context: &GatewayContext, command: Commands) -> Result<()> {
    match command {
        Commands::Status { json } => handle_status(context, json).await,
        Commands::Proxy(cmd) => proxy_commands::handle(context, cmd).await,
        Commands::Account(cmd) => account_commands::handle(context, cmd).await,
        Commands::Rebalance => handle_rebalance(context).await,
        Commands::Chat { model, stream, prompt } => {
            handle_chat(context, &model, stream, &prompt).await
        },
        Commands::Config(cmd) => config_commands::handle(context, cmd).await,
    }
}

async fn handle_status(context: &GatewayContext, json: bool) -> Result<()> {
    let proxies = context.pool.snapshot().await;
    let accounts = context.registry.list();
    let count = |status: ProxyStatus| proxies.iter().filter(|p| p.status == status).count();
    let bound = context.pool.bindings().await.len();
    let usable = accounts.iter().filter(|a| a.is_usable()).count();
    let shared = proxies.iter().filter(|p| p.load() > 1).count();

    if json {
        let summary = serde_json::json!({
            "proxies": {
                "total": proxies.len(),
                "available": count(ProxyStatus::Available),
                "untested": count(ProxyStatus::Untested),
                "failed": count(ProxyStatus::Failed),
                "shared": shared,
            },
            "accounts": { "total": accounts.len(), "usable": usable, "bound": bound },
            "require_proxy": context.config.require_proxy,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", "Qwenpool Status".cyan().bold());
    println!(
        "  Proxies:  {} total, {} available, {} untested, {} failed",
        proxies.len(),
        count(ProxyStatus::Available).to_string().green(),
        count(ProxyStatus::Untested).to_string().yellow(),
        count(ProxyStatus::Failed).to_string().red()
    );
    if shared > 0 {
        println!("  {} {} proxies serve more than one account", "!".yellow(), shared);
    }
    println!("  Accounts: {} total, {} usable, {} bound", accounts.len(), usable, bound);
    println!("  Data dir: {}", context.data_dir.display());
    println!("  Version:  {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

async fn handle_rebalance(context: &GatewayContext) -> Result<()> {
    let moved = context.rebalance().await;
    if moved.is_empty() {
        println!("{} Bindings are consistent, nothing to reassign", "✓".green());
        return Ok(());
    }

    for entry in &moved {
        match &entry.proxy {
            Some(url) => println!(
                "{} {} ({}) -> {}",
                "↻".cyan(),
                entry.email,
                entry.reason,
                qwenpool_core::utils::http::redact_proxy_url(url)
            ),
            None => println!("{} {} ({}) left unserved", "✗".red(), entry.email, entry.reason),
        }
    }
    println!("\n{} accounts reassigned", moved.len());
    Ok(())
}

async fn handle_chat(context: &GatewayContext, model: &str, stream: bool, prompt: &str) -> Result<()> {
    let request = ChatRequest::user_prompt(model, prompt, stream);
    let completion = match context.dispatcher.send_chat_request(request).await {
        Ok(completion) => completion,
        Err(err) => {
            if let Some(stage) = err.stage() {
                eprintln!("{} Failed during {}", "✗".red(), stage);
            }
            if err.is_transport() {
                eprintln!("  {} account moved to another proxy; retrying may succeed", "!".yellow());
            }
            return Err(anyhow::Error::new(err).context("chat dispatch failed"));
        },
    };

    eprintln!(
        "{} account={} chat_id={}",
        "✓".green(),
        completion.account,
        completion.chat_id
    );

    match completion.body {
        ChatBody::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        ChatBody::Stream(mut chunks) => {
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = chunks.next().await {
                let bytes = chunk.context("stream interrupted")?;
                stdout.write_all(&bytes).await?;
                stdout.flush().await?;
            }
            stdout.write_all(b"\n").await?;
        },
    }
    Ok(())
}
