//! CLI command definitions

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run journeys from one or more scenario files
    Run {
        /// Scenario YAML files, run in the order given
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,

        /// Only run the named journey(s); can be given multiple times
        #[arg(long)]
        only: Vec<String>,

        /// Directory for failure artifacts (overrides the config file)
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },

    /// Capture the current screen
    Snapshot {
        /// Print the raw UI dump instead of the parsed snapshot
        #[arg(long)]
        raw: bool,
    },

    /// Search the device log for events
    Logs {
        /// Regex patterns; each match becomes one event
        #[arg(required = true)]
        patterns: Vec<String>,

        /// Only consider lines logged at or after this epoch timestamp (ms),
        /// widened by the configured lookback (default: now)
        #[arg(long)]
        since_ms: Option<u64>,
    },

    /// Show the effective configuration file location
    Config,
}
