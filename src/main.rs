//! journey - mobile end-to-end journey runner
//!
//! Drives an Android app over adb through declarative journeys, waits for
//! the UI and device logs to converge, and reports per-journey results.

use std::path::PathBuf;

use clap::Parser;
use journey::cli;
use journey::commands::Commands;
use journey::common::logging;

#[derive(Parser)]
#[command(name = "journey", about = "Mobile end-to-end journey runner")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    if let Err(e) = cli::dispatch(cli.command, cli.config.as_deref()).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
