mod commands;

use clap::Parser;
use commands::{execute_command, load_config, Commands};
use std::path::PathBuf;

/// Resolve tracks against a catalog search and detail interface
#[derive(Parser)]
#[command(
    name = "track-resolver",
    about = "Resolve tracks against a catalog search and detail interface",
    long_about = None
)]
struct Cli {
    /// Show detailed debug information
    #[arg(long, global = true)]
    verbose: bool,

    /// JSON configuration file; TRACK_RESOLVER_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = execute_command(args.command, config).await {
        eprintln!("❌ Command failed: {e}");
        std::process::exit(1);
    }

    Ok(())
}
