//! pm-bot: autonomous order-execution agent for one monitored market.
//!
//! Usage:
//!   pm-bot [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Config file path (default: config/agent.toml)
//!   --ws-url <URL>          Market stream URL (overrides config)
//!   --gateway-url <URL>     Trading gateway URL (overrides config)
//!   --rules <FILE>          Rule store path (overrides config)
//!
//! Credentials come from the environment (`PM_API_TOKEN`,
//! `PM_SIGNER_KEY`, `PM_PROXY_ADDRESS`), never from the config file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pm_bot::config::BotConfig;
use pm_bot::engine::{EngineConfig, RuleEngine};
use pm_bot::gate::Credentials;
use pm_bot::gateway::HttpGateway;
use pm_bot::notice::Notice;
use pm_bot::rules::RuleStore;
use pm_feed::session::{self, SubscriptionParams};

/// CLI arguments for pm-bot.
#[derive(Parser, Debug)]
#[command(name = "pm-bot")]
#[command(about = "Autonomous order-execution agent for a prediction market")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/agent.toml")]
    config: PathBuf,

    /// Market stream WebSocket URL (overrides config file)
    #[arg(long)]
    ws_url: Option<String>,

    /// Trading gateway base URL (overrides config file)
    #[arg(long)]
    gateway_url: Option<String>,

    /// Rule store path (overrides config file)
    #[arg(long)]
    rules: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // Load environment variables from .env file (if present)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();

    let mut config = if args.config.exists() {
        BotConfig::from_file(&args.config)
            .with_context(|| format!("failed to load config from {:?}", args.config))?
    } else {
        eprintln!(
            "Config file not found at {:?}, using defaults",
            args.config
        );
        BotConfig::default()
    };

    config.apply_env_overrides();
    if let Some(url) = args.ws_url {
        config.stream.ws_url = url;
    }
    if let Some(url) = args.gateway_url {
        config.gateway.base_url = url;
    }
    if let Some(path) = args.rules {
        config.trading.rules_path = path;
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;

    config.validate().context("configuration validation failed")?;

    info!("starting pm-bot");
    info!(market = %config.market.condition_id, tokens = config.market.tokens.len(), "monitored market");

    let credentials = Credentials::from_env();
    if !credentials.is_authenticated() {
        warn!("PM_API_TOKEN not set; rules will evaluate but no order can pass the gate");
    }

    let gateway = Arc::new(HttpGateway::new(
        config.gateway.base_url.clone(),
        credentials.api_token.clone(),
    ));

    let rules = RuleStore::load(config.trading.rules_path.clone())
        .with_context(|| format!("failed to load rules from {:?}", config.trading.rules_path))?;

    // Operator notice channel: connection changes and submission results.
    let (notice_tx, mut notice_rx) = mpsc::channel::<Notice>(256);
    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            notice.log();
        }
    });

    // Stream session.
    let (session_handle, feed_rx) = session::spawn(config.stream.session_config());

    // Forward connection state transitions to the notice channel.
    let mut state_rx = session_handle.watch_state();
    let state_notice_tx = notice_tx.clone();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow().clone();
            if state_notice_tx.send(Notice::Connection(state)).await.is_err() {
                break;
            }
        }
    });

    // Rule engine.
    let engine_config = EngineConfig {
        condition_id: config.market.condition_id.clone(),
        refresh_interval: Duration::from_secs(config.trading.refresh_interval_secs),
        default_min_order_size: config.trading.default_min_order_size,
        order_type: config.trading.order_type().context("invalid order type")?,
    };
    let mut engine = RuleEngine::new(engine_config, gateway, credentials, rules, notice_tx);

    let instruments: Vec<(String, String)> = config
        .market
        .tokens
        .iter()
        .map(|t| (t.token_id.clone(), t.outcome.clone()))
        .collect();
    engine.register_instruments(&instruments);

    // Shutdown plumbing.
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown().await {
            error!("shutdown signal handler error: {}", e);
        }
        info!("requesting shutdown...");
        let _ = shutdown_tx.send(());
    });

    // Open the subscription and run the engine to completion.
    let asset_ids: Vec<String> = config
        .market
        .tokens
        .iter()
        .map(|t| t.token_id.clone())
        .collect();
    session_handle
        .open(SubscriptionParams { asset_ids })
        .await;

    engine.run(feed_rx, shutdown_rx).await;

    session_handle.close().await;
    info!("pm-bot stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let args = Args::try_parse_from(["pm-bot"]).unwrap();
        assert_eq!(args.config.to_str().unwrap(), "config/agent.toml");
        assert!(args.ws_url.is_none());
        assert!(args.gateway_url.is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::try_parse_from([
            "pm-bot",
            "-c",
            "/etc/agent.toml",
            "--ws-url",
            "ws://localhost:9001",
            "--gateway-url",
            "http://localhost:8000",
            "--rules",
            "/tmp/rules.json",
        ])
        .unwrap();

        assert_eq!(args.config.to_str().unwrap(), "/etc/agent.toml");
        assert_eq!(args.ws_url.as_deref(), Some("ws://localhost:9001"));
        assert_eq!(args.gateway_url.as_deref(), Some("http://localhost:8000"));
        assert_eq!(args.rules.unwrap().to_str().unwrap(), "/tmp/rules.json");
    }
}
