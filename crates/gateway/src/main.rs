//! agentgate — the agent gateway binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ag_domain::config::{Config, ConfigSeverity};
use ag_gateway::auth::tokens::TokenManager;
use ag_gateway::bootstrap;
use ag_protocol::Role;

#[derive(Parser)]
#[command(name = "agentgate", version, about = "Multiplexing agent gateway")]
struct Cli {
    /// Config file (default: ~/.agentgate/agentgate.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default).
    Run,
    /// Validate the config file and exit.
    Check,
    /// Manage device tokens.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue a token for a device (revokes its previous token).
    Issue {
        device_id: String,
        /// "operator" or "node".
        #[arg(long, default_value = "operator")]
        role: String,
        /// Scopes, e.g. "*" or "tool:files".
        #[arg(long)]
        scope: Vec<String>,
        #[arg(long)]
        expires_in_days: Option<u32>,
    },
    /// List issued tokens (values redacted).
    List,
    /// Revoke a token by value.
    Revoke { token: String },
}

fn default_config_path() -> Option<PathBuf> {
    let path = dirs::home_dir()?.join(".agentgate").join("agentgate.toml");
    path.exists().then_some(path)
}

fn load_config(path: &Option<PathBuf>) -> anyhow::Result<(Config, Option<PathBuf>)> {
    let path = path.clone().or_else(default_config_path);
    match &path {
        Some(p) => {
            let config = Config::load(p)?;
            Ok((config, path))
        }
        None => {
            tracing::warn!("no config file found — running with defaults");
            Ok((Config::default(), None))
        }
    }
}

fn report_issues(config: &Config) -> bool {
    let issues = config.validate();
    for issue in &issues {
        eprintln!("{issue}");
    }
    issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ag_gateway=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let (config, config_path) = load_config(&cli.config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            if report_issues(&config) {
                anyhow::bail!("config has errors — refusing to start");
            }
            let state = bootstrap::build_state(config)?;
            bootstrap::serve(state, config_path).await?;
        }
        Command::Check => {
            if report_issues(&config) {
                anyhow::bail!("config has errors");
            }
            println!("config ok");
        }
        Command::Token { action } => {
            let tokens = TokenManager::load(&config.sessions.root);
            match action {
                TokenAction::Issue {
                    device_id,
                    role,
                    scope,
                    expires_in_days,
                } => {
                    let role = match role.as_str() {
                        "operator" => Role::Operator,
                        "node" => Role::Node,
                        other => anyhow::bail!("unknown role: {other}"),
                    };
                    let scopes = if scope.is_empty() {
                        vec!["*".to_string()]
                    } else {
                        scope
                    };
                    let token = tokens.issue(&device_id, role, scopes, expires_in_days)?;
                    println!("{}", token.token);
                }
                TokenAction::List => {
                    for token in tokens.list() {
                        println!(
                            "{}  role={}  scopes={}  expires={}",
                            token.device_id,
                            token.role.as_str(),
                            token.scopes.join(","),
                            token
                                .expires_at
                                .map(|e| e.to_string())
                                .unwrap_or_else(|| "never".into()),
                        );
                    }
                }
                TokenAction::Revoke { token } => {
                    if tokens.revoke(&token)? {
                        println!("revoked");
                    } else {
                        println!("unknown token");
                    }
                }
            }
        }
    }

    Ok(())
}
