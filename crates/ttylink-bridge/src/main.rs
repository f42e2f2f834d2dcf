//! ttylink
//!
//! Exposes a serial device over TCP: one client at a time, raw bytes in
//! both directions.

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ttylink_core::config::load_config;
use ttylink_core::tracing_init::{default_filter, init_tracing};
use ttylink_core::{BridgeConfig, DataBits, Parity, ShortWritePolicy, StopBits};

#[derive(Parser, Debug)]
#[command(name = "ttylink")]
#[command(version, about = "ttylink - relay a TCP client to a serial device")]
struct Args {
    /// JSON config file (defaults to ~/.config/ttylink/config.json when present).
    #[arg(short = 'c', long, env = "TTYLINK_CONFIG")]
    config: Option<PathBuf>,

    /// TCP listening address [default: 0.0.0.0:1234]
    #[arg(short = 'l', long)]
    listen: Option<String>,

    /// Serial device name [default: /dev/ttyS1]
    #[arg(short = 's', long)]
    serial: Option<String>,

    /// Serial baud rate [default: 9600]
    #[arg(long)]
    baud_rate: Option<u32>,

    /// Serial data bits, 7 or 8 [default: 8]
    #[arg(long)]
    data_bits: Option<DataBits>,

    /// Serial stop bits, 1, 1.5 or 2 [default: 1]
    #[arg(long)]
    stop_bits: Option<StopBits>,

    /// Serial parity: None, Odd, Even, Mark or Space [default: None]
    #[arg(long)]
    parity: Option<Parity>,

    /// Log forwarded bytes [default: true]
    #[arg(long)]
    verbose: Option<bool>,

    /// What to do when a write is cut short: lenient or strict [default: lenient]
    #[arg(long)]
    short_write: Option<ShortWritePolicy>,

    /// Accept a new client after each session instead of exiting.
    #[arg(long)]
    keep_serving: bool,

    /// Log level filter (e.g. "info", "debug", "warn") [default: info]
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

impl Args {
    /// Apply flags given on the command line over the resolved config.
    fn apply(self, config: &mut BridgeConfig) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(device) = self.serial {
            config.serial.device = device;
        }
        if let Some(baud_rate) = self.baud_rate {
            config.serial.baud_rate = baud_rate;
        }
        if let Some(data_bits) = self.data_bits {
            config.serial.data_bits = data_bits;
        }
        if let Some(stop_bits) = self.stop_bits {
            config.serial.stop_bits = stop_bits;
        }
        if let Some(parity) = self.parity {
            config.serial.parity = parity;
        }
        if let Some(verbose) = self.verbose {
            config.verbose = verbose;
        }
        if let Some(short_write) = self.short_write {
            config.short_write = short_write;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        config.keep_serving |= self.keep_serving;
        config.log_json |= self.log_json;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    init_tracing(
        &default_filter("ttylink_bridge", &config.log_level),
        config.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen,
        device = %config.serial.device,
        baud_rate = config.serial.baud_rate,
        verbose = config.verbose,
        short_write = %config.short_write,
        keep_serving = config.keep_serving,
        "Starting ttylink"
    );

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_shutdown.cancel();
        }
    });

    if let Err(e) = ttylink_bridge::serve(&config, &shutdown).await {
        error!(error = %e, "ttylink stopped");
        return Err(e.into());
    }

    info!("ttylink stopped");
    Ok(())
}
