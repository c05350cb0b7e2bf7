//! Serve a host directory through a path-based filesystem adapter over FUSE.
use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, error};

mod app_config;
mod daemon;
mod trc;

use crate::app_config::Config;
use crate::trc::Trc;

/// Crate version plus the git SHA recorded by the build script.
const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_SHA"),
    ")"
);

#[derive(Parser)]
#[command(
    version = VERSION,
    about = "Serve a host directory through a path-based FUSE adapter."
)]
struct Args {
    #[arg(
        short,
        long,
        value_parser,
        help = "Optional path to a path-fuse config TOML."
    )]
    config_path: Option<PathBuf>,

    #[arg(short, long, help = "Directory to serve. Overrides the config file.")]
    source: Option<PathBuf>,

    #[arg(short, long, help = "Where to mount. Overrides the config file.")]
    mount_point: Option<PathBuf>,
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    // Errors use eprintln since tracing isn't initialized yet.
    let mut config = Config::load(args.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });
    if let Some(source) = args.source {
        config.source = Some(source);
    }
    if let Some(mount_point) = args.mount_point {
        config.mount_point = mount_point;
    }
    if let Err(error_messages) = config.validate() {
        eprintln!("Configuration is invalid.");
        for msg in &error_messages {
            eprintln!(" - {msg}");
        }
        std::process::exit(1);
    }

    if let Err(e) = Trc::default().init() {
        eprintln!(
            "Failed to initialize logging. Without logging, we can't provide any useful error \
             messages, so we have to exit: {e}"
        );
        std::process::exit(1);
    }

    debug!(version = VERSION, config = ?config, "Starting path-fuse...");
    if let Err(e) = daemon::spawn(config) {
        error!("Daemon failed: {e}");
        std::process::exit(1);
    }
}
