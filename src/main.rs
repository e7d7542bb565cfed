use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swerve_zenoh_runtime::config::{DriveConfig, MOTOR_PORT};
use swerve_zenoh_runtime::runtime::{self, RunOptions};

/// Swerve drive runtime: commands in over Zenoh, wheel commands out to the motor bus
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Drive configuration (JSON); built-in defaults if omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port of the motor bus
    #[arg(long, default_value = MOTOR_PORT)]
    port: String,

    /// Run against simulated wheels and gyro instead of hardware
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            info!("Loading drive configuration from {}", path.display());
            DriveConfig::load(path)
        }
        None => Ok(DriveConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let options = RunOptions {
        config,
        port: args.port,
        simulate: args.simulate,
    };
    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
