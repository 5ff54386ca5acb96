//! camera_agent - single-camera analysis agent
//!
//! This daemon:
//! 1. Captures the configured video source through ffmpeg
//! 2. Keeps the last window of frames in memory
//! 3. Encodes the window into a clip every second
//! 4. Analyzes the clip periodically and forwards results to the collector
//! 5. Serves the latest frame, clip and state over HTTP

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use camera_agent::{AgentConfig, CameraAgent};

#[derive(Parser, Debug)]
#[command(author, version, about = "Single-camera clip analysis agent")]
struct Args {
    /// JSON configuration file. Environment variables override its values.
    #[arg(long, env = "CAMERA_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Use canned analysis results instead of the analysis provider.
    #[arg(long)]
    mock: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = AgentConfig::load_from(args.config.as_deref(), args.mock)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        shutdown_handler.store(true, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    let agent = CameraAgent::new(config)?;
    if let Err(err) = agent.run(shutdown) {
        log::error!("camera agent failed: {:#}", err);
        return Err(err);
    }
    Ok(())
}
