//! STN1110 OBD Adapter Simulator
//!
//! Serves the STN1110 command set on a serial port (typically one end of a
//! pseudo-terminal pair) until interrupted with Ctrl-C.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use hwsim::protocol::StnCodec;
use hwsim::transport::{open_serial, split_framed};
use hwsim::{SimulatorConfig, Stn1110Simulator};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// STN1110 OBD adapter simulator
#[derive(Parser, Debug)]
#[command(name = "stn1110-sim", version, about, long_about = None)]
struct Args {
    /// Serial port to serve, e.g. /dev/pts/3
    port: String,

    /// Baud rate [default: 38400]
    #[arg(short, long)]
    baud: Option<u32>,

    /// Read timeout in milliseconds [default: 1000]
    #[arg(long)]
    read_timeout_ms: Option<u64>,

    /// JSON configuration file; command-line options take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<SimulatorConfig> {
        let mut config = match &self.config {
            Some(path) => SimulatorConfig::load(path)?,
            None => SimulatorConfig::default(),
        };

        config.serial.port = self.port;
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
        if let Some(ms) = self.read_timeout_ms {
            config.serial.read_timeout_ms = ms;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "stn1110_sim=info,hwsim=info,hwsim_protocol=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let print_config = args.print_config;
    let config = args.into_config()?;

    if print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    tracing::info!("Starting STN1110 simulator on {}", config.serial.port);

    let stream = open_serial(&config.serial)
        .with_context(|| format!("cannot serve {}", config.serial.port))?;
    let (mut reader, writer) =
        split_framed(stream, StnCodec::new(), config.serial.read_timeout());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            // Dropping the sender would stop the simulator; keep it alive
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Interrupted");
        let _ = shutdown_tx.send(true);
    });

    let mut sim = Stn1110Simulator::new(config.stn);
    sim.run(&mut reader, writer, shutdown_rx)
        .await
        .context("serial I/O failed")?;

    Ok(())
}
