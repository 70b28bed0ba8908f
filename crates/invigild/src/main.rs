//! invigild - the exam telemetry broker daemon
//!
//! Binds the pub/sub broker and routes activity and alert traffic between
//! student monitors and proctor dashboards. Production deployments may run
//! a different broker; this one backs development and the test suites.

use anyhow::{Context, Result};
use clap::Parser;
use invigil_channel::Broker;
use invigil_config::load_config;
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// invigild - exam telemetry broker
#[derive(Parser, Debug)]
#[command(name = "invigild")]
#[command(about = "Exam telemetry broker daemon", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "INVIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address override (or set INVIGIL_BROKER_ADDR env var)
    #[arg(short, long, env = "INVIGIL_BROKER_ADDR")]
    addr: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "invigild starting");

    let config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => invigil_config::Config::default(),
    };

    let addr = args.addr.unwrap_or(config.broker.addr);
    let broker = Broker::bind_with_heartbeat(&addr, config.broker.heartbeat_interval)
        .await
        .with_context(|| format!("Failed to bind broker on {addr}"))?;

    info!(addr = %broker.local_addr(), "Broker ready");

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::select! {
        result = broker.run() => result.context("Broker stopped unexpectedly")?,
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        _ = sigint.recv() => info!("SIGINT received, shutting down"),
    }

    Ok(())
}
