#![forbid(unsafe_code)]

//! `csend-bridge`: runs the chatbot against a CSend process in machine mode.
//!
//! Loads configuration, spawns the child, starts the bot, and runs until the
//! child exits or the process receives ctrl-c / SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use csend_bridge::bot::responder::FallbackResponder;
use csend_bridge::bot::Chatbot;
use csend_bridge::config::GlobalConfig;
use csend_bridge::machine::MachineClient;
use csend_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "csend-bridge", about = "CSend machine-mode chatbot", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// CSend executable; overrides the config file and environment.
    #[arg(long)]
    executable: Option<PathBuf>,

    /// Username announced to peers; overrides the config file and environment.
    #[arg(long)]
    identity: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("csend-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = GlobalConfig::resolve(args.config.as_deref(), args.executable, args.identity)?;
    info!(
        executable = %config.executable.display(),
        identity = %config.identity,
        "configuration loaded"
    );

    // ── Start the child ─────────────────────────────────
    let client = MachineClient::connect(&config).await.map_err(|err| {
        error!(%err, "failed to start CSend in machine mode");
        err
    })?;

    // ── Start the bot ───────────────────────────────────
    let responder = Arc::new(FallbackResponder::new(config.bot.fallback_reply.clone()));
    let bot = Chatbot::new(client.clone(), config.bot.clone(), responder);
    bot.start().await;

    // ── Run until the child exits or we are told to stop ─
    tokio::select! {
        () = bot.run_until_closed() => info!("CSend process exited"),
        () = shutdown_signal() => info!("shutdown signal received"),
    }

    let exit = client.disconnect().await;
    info!(?exit, stats = ?bot.stats(), "csend-bridge shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                if let Err(err) = ctrl_c.await {
                    tracing::error!(%err, "ctrl-c signal handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
