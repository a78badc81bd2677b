use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "qwenpool",
    about = "Qwenpool - chat gateway multiplexing accounts over a SOCKS5 proxy pool",
    version = env!("CARGO_PKG_VERSION"),
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, env = "QWENPOOL_DATA_DIR", help = "Data directory (default ~/.qwenpool)")]
    pub data_dir: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Log filter when RUST_LOG is unset (e.g. debug)")]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Show pool and account summary")]
    Status {
        #[arg(short, long, help = "Output as JSON")]
        json: bool,
    },

    #[command(subcommand, about = "Manage the proxy pool")]
    Proxy(ProxyCommands),

    #[command(subcommand, about = "Manage upstream accounts")]
    Account(AccountCommands),

    #[command(about = "Validate bindings and reassign released accounts")]
    Rebalance,

    #[command(about = "Dispatch one chat completion")]
    Chat {
        #[arg(short, long, default_value = "qwen-max", help = "Target model")]
        model: String,

        #[arg(long, help = "Stream the completion to stdout")]
        stream: bool,

        #[arg(help = "User prompt")]
        prompt: String,
    },

    #[command(subcommand, about = "View and modify configuration")]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ProxyCommands {
    #[command(about = "List proxies with status and load")]
    List {
        #[arg(short, long, help = "Output as JSON")]
        json: bool,
    },

    #[command(about = "Add a proxy (socks5://host:port, host:port or host:port:user:pass)")]
    Add {
        #[arg(help = "Proxy declaration")]
        url: String,
    },

    #[command(about = "Remove a proxy and release its accounts")]
    Remove {
        #[arg(help = "Proxy declaration")]
        url: String,
    },

    #[command(about = "Probe one proxy, or every proxy when none is given")]
    Check {
        #[arg(help = "Proxy declaration")]
        url: Option<String>,
    },

    #[command(about = "Mark a proxy failed until it is checked again")]
    Fail {
        #[arg(help = "Proxy declaration")]
        url: String,
    },

    #[command(about = "Re-read the proxies file and reset every status to untested")]
    Reload,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    #[command(about = "List accounts with binding and token state")]
    List {
        #[arg(short, long, help = "Output as JSON")]
        json: bool,
    },

    #[command(about = "Register an account")]
    Add {
        #[arg(help = "Account email")]
        email: String,

        #[arg(help = "Password, or refresh token with --cli")]
        secret: String,

        #[arg(long, help = "Secret is an OAuth refresh token")]
        cli: bool,
    },

    #[command(about = "Remove an account and its binding")]
    Remove {
        #[arg(help = "Account email")]
        email: String,
    },

    #[command(about = "Replace an account's password or refresh token")]
    SetSecret {
        #[arg(help = "Account email")]
        email: String,

        #[arg(help = "New secret")]
        secret: String,
    },

    #[command(about = "Re-read the accounts file and add new emails")]
    Reload,

    #[command(about = "Create a CLI account through the device flow, approved by a web account")]
    Login {
        #[arg(help = "Signed-in web account that approves the device code")]
        email: String,

        #[arg(long, help = "Identity for the new account (default <email>#cli)")]
        identity: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    #[command(about = "Show current configuration and persisted settings")]
    Show {
        #[arg(short, long, help = "Output as JSON")]
        json: bool,
    },

    #[command(about = "Set a configuration value or persisted setting")]
    Set {
        #[arg(help = "Key (e.g. 'require_proxy', 'session_cookie_primary')")]
        key: String,

        #[arg(help = "New value")]
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_chat_and_globals() {
        let cli = Cli::try_parse_from([
            "qwenpool",
            "--data-dir",
            "/tmp/qp",
            "chat",
            "--model",
            "qwen-plus",
            "--stream",
            "hello there",
        ])
        .unwrap();

        assert_eq!(cli.data_dir.as_deref(), Some(std::path::Path::new("/tmp/qp")));
        match cli.command {
            Commands::Chat { model, stream, prompt } => {
                assert_eq!(model, "qwen-plus");
                assert!(stream);
                assert_eq!(prompt, "hello there");
            },
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn test_parse_account_set_secret() {
        let cli =
            Cli::try_parse_from(["qwenpool", "account", "set-secret", "a@x.com", "pw2"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Account(AccountCommands::SetSecret { ref email, .. }) if email == "a@x.com"
        ));
    }

    #[test]
    fn test_parse_proxy_fail() {
        let cli = Cli::try_parse_from(["qwenpool", "proxy", "fail", "10.0.0.1:1080"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Proxy(ProxyCommands::Fail { ref url }) if url == "10.0.0.1:1080"
        ));
    }
}
