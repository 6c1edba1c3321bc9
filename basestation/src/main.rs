//! Base station binary: wires the ZeroMQ radio driver into the realtime
//! coordinator (C6), per the CLI surface and graceful-shutdown sequence
//! of §6/§5.

mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use interfaces::zmq_rf::ZmqRfDriver;
use layers::coordinator::Core;

/// OFDM base station core.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Receive gain in dB.
    #[arg(short = 'g', long = "rxgain")]
    rxgain: Option<i32>,

    /// Transmit gain in dB.
    #[arg(short = 't', long = "txgain")]
    txgain: Option<i32>,

    /// Carrier frequency in Hz.
    #[arg(short = 'f', long = "frequency")]
    frequency: Option<f64>,

    /// Path to a TOML configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Log verbosity, `0..5` (0=error .. 4=trace). Overrides the
    /// configured `RUST_LOG`-style filter when given.
    #[arg(short = 'l', long = "log")]
    log: Option<u8>,
}

fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let file_config = match &args.config {
        Some(path) => config::FileConfig::load(path)
            .with_context(|| format!("loading config file {}", path.display()))?,
        None => config::FileConfig::default(),
    };
    let effective = config::resolve(file_config, &args)?;

    init_tracing(&effective.log_filter);

    tracing::info!(
        rx_gain = effective.core.rx_gain,
        tx_gain = effective.core.tx_gain,
        frequency_hz = ?effective.core.frequency_hz,
        "starting base station core"
    );

    let driver = ZmqRfDriver::new(effective.radio).context("failed to initialize ZMQ radio driver")?;
    let core = Core::new(driver, effective.core);
    let handles = core.spawn();

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received, stopping coordinator tasks");

    // `shutdown()` blocking-joins four OS threads; run it off the async
    // runtime's own worker threads so ctrl_c's executor isn't stalled.
    tokio::task::spawn_blocking(move || handles.shutdown())
        .await
        .context("coordinator shutdown task panicked")?;

    tracing::info!("base station core stopped");
    Ok(())
}
