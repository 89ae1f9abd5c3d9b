// SPDX-License-Identifier: GPL-3.0-only

use camera_vision::config::Config;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-vision")]
#[command(about = "Concurrent camera capture and frame analysis")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Config file (default: ~/.config/camera-vision/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Run a camera with the built-in processors
    Run {
        /// Camera id to use (from 'camera-vision list')
        #[arg(short, long)]
        camera: Option<String>,

        /// Run duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Resolution preset (SD, 720p, HD, 4K)
        #[arg(short, long)]
        resolution: Option<String>,

        /// Block the camera instead of dropping frames under load
        #[arg(long)]
        block_producer: bool,

        /// Let processors draw overlays
        #[arg(long)]
        overlay: bool,

        /// Control command applied after start, e.g. zoom=2.0, torch=on,
        /// focus=0.5,0.5, exposure=-1, linear-zoom=0.3
        #[arg(long = "control", value_name = "NAME=VALUE")]
        controls: Vec<String>,
    },

    /// Write the current configuration to the config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    // RUST_LOG takes precedence over -v
    // Examples: RUST_LOG=debug, RUST_LOG=camera_vision=trace
    let default_filter = match cli.verbose {
        0 => "warn",
        1 => "camera_vision=debug",
        _ => "camera_vision=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let config = Config::load_or_default(cli.config.as_deref());

    match cli.command {
        Commands::List => cli::list_cameras(&config).await?,
        Commands::Run {
            camera,
            duration,
            resolution,
            block_producer,
            overlay,
            controls,
        } => {
            let options = cli::RunOptions {
                camera,
                duration,
                resolution,
                block_producer,
                overlay,
                controls,
            };
            cli::run_camera(&config, options).await?
        }
        Commands::InitConfig { force } => cli::write_config(&config, cli.config, force)?,
    }

    Ok(())
}
