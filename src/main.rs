#![allow(missing_docs)]

//! Switchboard — bridges chat platforms to a single AI-agent backend.
//!
//! `start` brings up one adapter per enabled platform, wires them to the
//! orchestrator, and runs until Ctrl+C. `check` validates configuration
//! and probes the agent backend without connecting any platform.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use switchboard::adapters::telegram::{TelegramAdapter, TelegramConfig};
use switchboard::adapters::zalo::{ZaloAdapter, ZaloConfig};
use switchboard::agent::{AgentTransport, HttpAgentClient};
use switchboard::config::SwitchboardConfig;
use switchboard::logging;
use switchboard::orchestrator::Orchestrator;
use switchboard::registry::AdapterRegistry;
use switchboard::types::Platform;

#[derive(Parser)]
#[command(name = "switchboard", about = "Chat-platform-to-agent bridge")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bridge until interrupted.
    Start {
        /// Directory for rotated JSON logs.
        #[arg(long, default_value = "logs")]
        logs_dir: PathBuf,
    },
    /// Validate configuration and probe the agent backend.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; ignore absence.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Start {
        logs_dir: PathBuf::from("logs"),
    }) {
        Command::Start { logs_dir } => start(&logs_dir).await,
        Command::Check => check().await,
    }
}

/// Bring up adapters, wire the orchestrator, and block until Ctrl+C.
async fn start(logs_dir: &std::path::Path) -> Result<()> {
    let _logging_guard = logging::init_production(logs_dir)?;

    let config = SwitchboardConfig::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    info!(version = env!("CARGO_PKG_VERSION"), "switchboard starting");

    let agent: Arc<dyn AgentTransport> =
        Arc::new(HttpAgentClient::new(config.agent.base_url.clone()));
    if !agent.health_check().await {
        warn!(url = %config.agent.base_url, "agent backend not reachable at startup");
    }

    let registry = Arc::new(AdapterRegistry::new());
    connect_platforms(&registry, &config).await?;

    let orchestrator = Orchestrator::new(Arc::clone(&registry), agent, config.agent.echo_mode);
    orchestrator.attach_handlers().await;

    info!("switchboard running, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;

    orchestrator.shutdown().await;
    info!("switchboard stopped");
    Ok(())
}

/// Acquire one adapter per enabled platform. Fails only when every enabled
/// platform fails to connect.
async fn connect_platforms(
    registry: &Arc<AdapterRegistry>,
    config: &SwitchboardConfig,
) -> Result<()> {
    let mut connected = 0u32;

    if config.telegram.enabled {
        let tg_config = TelegramConfig {
            bot_token: config.telegram.bot_token.clone(),
            poll_timeout_seconds: config.telegram.poll_timeout_seconds,
        };
        match registry
            .acquire(Platform::Telegram, move || {
                Arc::new(TelegramAdapter::new(tg_config))
            })
            .await
        {
            Ok(_) => connected = connected.saturating_add(1),
            Err(e) => warn!(error = %e, "Telegram adapter failed to start"),
        }
    }

    if config.zalo.enabled {
        let zalo_config = ZaloConfig {
            base_url: config.zalo.base_url.clone(),
            cookie: config.zalo.cookie.clone(),
            imei: config.zalo.imei.clone(),
            user_agent: config.zalo.user_agent.clone(),
        };
        match registry
            .acquire(Platform::Zalo, move || Arc::new(ZaloAdapter::new(zalo_config)))
            .await
        {
            Ok(_) => connected = connected.saturating_add(1),
            Err(e) => warn!(error = %e, "Zalo adapter failed to start"),
        }
    }

    if connected == 0 {
        anyhow::bail!("no adapter could be started");
    }
    Ok(())
}

/// One-shot config validation and agent probe.
async fn check() -> Result<()> {
    logging::init_cli();

    let config = SwitchboardConfig::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    println!("configuration: ok");

    let agent = HttpAgentClient::new(config.agent.base_url.clone());
    if agent.health_check().await {
        println!("agent backend ({}): reachable", agent.base_url());
    } else {
        println!("agent backend ({}): NOT reachable", agent.base_url());
    }

    println!(
        "platforms enabled: telegram={} zalo={}",
        config.telegram.enabled, config.zalo.enabled
    );
    Ok(())
}
