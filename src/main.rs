//! AIRC Bridge - agent identity and relay client for the AIRC registry
//!
//! Registers an agent with the AIRC registry and relays its messages to a
//! local gateway process.

use airc_bridge::{
    config::AircConfig,
    registry::{HttpRegistry, RegistryApi, RegistryClient},
    BridgeBuilder,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "airc-bridge")]
#[command(version)]
#[command(about = "AIRC identity client and local gateway relay")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "AIRC_CONFIG")]
    config: Option<PathBuf>,

    /// Agent handle (overrides agent.handle)
    #[arg(long, env = "AIRC_HANDLE")]
    handle: Option<String>,

    /// Registry base URL (overrides registry.url)
    #[arg(long, env = "AIRC_REGISTRY_URL")]
    registry_url: Option<String>,

    /// Gateway WebSocket URL (overrides gateway.url)
    #[arg(long, env = "AIRC_GATEWAY_URL")]
    gateway_url: Option<String>,

    /// Operator name reported with presence (overrides agent.operator)
    #[arg(long, env = "AIRC_OPERATOR")]
    operator: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay bridge
    Run,

    /// Register and send a single message
    Send {
        /// Recipient handle
        #[arg(short, long)]
        to: String,

        /// Message text
        #[arg(short = 'm', long)]
        text: String,

        /// Optional JSON payload
        #[arg(short, long)]
        payload: Option<String>,
    },

    /// List active agents
    Presence,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

impl Cli {
    fn load_config(&self) -> Result<AircConfig> {
        let mut config = match &self.config {
            Some(path) => AircConfig::load(path)?,
            None => AircConfig::default(),
        };

        if let Some(handle) = &self.handle {
            config.agent.handle = handle.clone();
        }
        if let Some(url) = &self.registry_url {
            config.registry.url = url.clone();
        }
        if let Some(url) = &self.gateway_url {
            config.gateway.url = url.clone();
        }
        if let Some(operator) = &self.operator {
            config.agent.operator = Some(operator.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("airc_bridge={}", log_level).into());
    let subscriber = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = cli.load_config()?;

    match cli.command {
        Commands::Run => {
            run_bridge(config).await?;
        }
        Commands::Send { to, text, payload } => {
            send_message(config, &to, &text, payload.as_deref()).await?;
        }
        Commands::Presence => {
            show_presence(&config).await?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

async fn run_bridge(mut config: AircConfig) -> Result<()> {
    config.validate()?;
    tracing::info!(handle = %config.agent.handle, "Starting AIRC bridge");

    let bridge = BridgeBuilder::new(config)
        .on_message(|msg| {
            tracing::info!(from = %msg.from, id = %msg.id, "Relayed AIRC message");
        })
        .build();

    bridge
        .start()
        .await
        .context("Failed to start AIRC bridge")?;

    tracing::info!("AIRC bridge is running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    bridge.stop().await;

    Ok(())
}

async fn send_message(
    mut config: AircConfig,
    to: &str,
    text: &str,
    payload: Option<&str>,
) -> Result<()> {
    config.validate()?;
    let payload = payload
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("--payload is not valid JSON")?;

    let client = RegistryClient::from_config(&config);
    client.register().await.context("Registration failed")?;
    client.send(to, text, payload).await?;

    println!("Sent to {}", airc_bridge::registry::normalize_handle(to));
    Ok(())
}

async fn show_presence(config: &AircConfig) -> Result<()> {
    let registry = HttpRegistry::new(config.registry.url.clone());
    let agents = registry.list_presence().await?;

    if agents.is_empty() {
        println!("No active agents");
        return Ok(());
    }
    for agent in agents {
        let status = agent.working_on.as_deref().unwrap_or(&agent.status);
        println!("@{:<24} {}", agent.handle, status);
    }
    Ok(())
}

fn show_config(config: Option<&AircConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
