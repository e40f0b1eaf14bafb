//! autopost-send - trigger surface for the autopilot scheduler
//!
//! Runs a single tick and exits, or serves the HTTP API and optionally
//! fires ticks from an in-process timer until SIGINT/SIGTERM.

mod http;

use anyhow::Context;
use clap::Parser;
use libautopost::logging::{LogFormat, LoggingConfig};
use libautopost::{AutopilotService, AutopostError, Config};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "autopost-send")]
#[command(version)]
#[command(about = "Run the autopilot posting scheduler")]
#[command(long_about = "\
autopost-send - Run the autopilot posting scheduler

DESCRIPTION:
    Each tick finds the accounts whose autopilot is due, picks an unused
    caption and the least recently used image, publishes through the
    session client or the official API, and records the outcome.

USAGE:
    # Run one tick, print the report as JSON
    autopost-send --once

    # Serve POST /scheduler/run and GET /scheduler/status
    autopost-send --listen 127.0.0.1:8787

    # Serve and also tick every five minutes
    autopost-send --interval 5m

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (in-flight accounts finish)

CONFIGURATION:
    Configuration file: ~/.config/autopost/config.toml (or $AUTOPOST_CONFIG)

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
    3 - Invalid input
")]
struct Cli {
    /// Run a single tick, print the report, and exit
    #[arg(long)]
    once: bool,

    /// Address for the HTTP API (overrides [server] listen)
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Also run ticks on a timer, e.g. "60s" or "5m"
    #[arg(long, value_name = "DURATION")]
    interval: Option<humantime::Duration>,

    /// Configuration file (overrides $AUTOPOST_CONFIG)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format: text, json, or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env(cli.verbose);
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    logging.init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<AutopostError>()
                .map(|e| e.exit_code())
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(every) = cli.interval {
        if Duration::from(every).is_zero() {
            return Err(AutopostError::InvalidInput("--interval must be greater than zero".to_string()).into());
        }
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let listen = cli
        .listen
        .clone()
        .unwrap_or_else(|| config.server.listen.clone());

    let service = Arc::new(AutopilotService::from_config(config).await?);

    if cli.once {
        let report = service.run_tick(chrono::Utc::now().timestamp()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!("autopost-send starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("Received shutdown signal, stopping gracefully...");
        let _ = shutdown_tx.send(true);
    });

    let timer = cli.interval.map(|every| {
        let every: Duration = every.into();
        info!("Tick interval: {}", humantime::format_duration(every));
        tokio::spawn(run_timer(service.clone(), every, shutdown_rx.clone()))
    });

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {}", listen))?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");

    let router = http::build_router(http::AppState {
        service: service.clone(),
    });
    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await
        .context("HTTP server failed")?;

    if let Some(timer) = timer {
        if let Err(e) = timer.await {
            warn!("Timer task ended abnormally: {}", e);
        }
    }

    info!("autopost-send stopped");
    Ok(())
}

/// Fire a tick every `every` until shutdown; a running tick is never cut short
async fn run_timer(service: Arc<AutopilotService>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match service.run_tick(chrono::Utc::now().timestamp()).await {
                    Ok(report) => debug!(
                        attempted = report.attempted,
                        succeeded = report.succeeded,
                        "Timer tick complete"
                    ),
                    Err(e) => error!("Timer tick failed: {}", e),
                }
            }
            _ = shutdown.changed() => {
                info!("Shutdown requested, stopping timer");
                break;
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use futures::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    match Signals::new([SIGINT, SIGTERM]) {
        Ok(mut signals) => {
            if let Some(signal) = signals.next().await {
                debug!(signal, "Signal received");
            }
        }
        Err(e) => {
            warn!("Signal setup failed ({}), falling back to Ctrl-C", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
