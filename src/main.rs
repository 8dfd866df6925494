//! SetuIO - bridge daemon
//!
//! Runs a simulated articulation on a fixed step and exposes it to an
//! external controller:
//!
//! - **Subscriber (default port 5556)**: commands and setpoints from the controller
//! - **Publisher (default port 5555)**: replies to the controller

use clap::Parser;
use setu_io::{BridgeApp, Config, Error, Result};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<f64>,
}

/// Convert `--duration` seconds into a run limit
fn run_limit(secs: f64) -> Result<Duration> {
    if secs.is_nan() || secs <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "duration must be positive, got {}",
            secs
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::InvalidParameter(format!("duration {}: {}", secs, e)))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let duration = args.duration.map(run_limit).transpose()?;

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // Config level is the default filter; RUST_LOG wins
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("SetuIO v{} starting...", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => log::info!("Using config: {}", path),
        None => log::info!("Using default configuration"),
    }

    let mut app = BridgeApp::new(config)?;
    app.run(duration)?;

    log::info!("SetuIO stopped");
    Ok(())
}
