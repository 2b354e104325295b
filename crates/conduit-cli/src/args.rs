//! CLI argument definitions using clap
//!
//! - conduit run                 # Keep connections up and forward log errors
//! - conduit test [NAME]         # Connect, ping and report
//! - conduit connections         # List configured connections
//! - conduit watch <PATH>        # Classify a log file live

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default configuration file name used across all CLI commands.
pub const DEFAULT_CONFIG_FILE: &str = "conduit.toml";

#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(about = "Supervised JSON-RPC connections with log-driven error notifications")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (JSON, TOML or YAML)
    #[arg(long, short = 'c', global = true, default_value = DEFAULT_CONFIG_FILE, env = "CONDUIT_CONFIG")]
    pub config: PathBuf,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start all enabled connections and forward log errors until interrupted
    Run {
        /// Log file to watch (overrides the configured watcher path)
        #[arg(long)]
        watch: Option<PathBuf>,

        /// Connections receiving error notifications (overrides the configured targets)
        #[arg(long = "notify", value_name = "NAME", value_delimiter = ',')]
        notify: Vec<String>,
    },

    /// Connect, ping and report, then disconnect
    Test {
        /// Connection to test
        #[arg(conflicts_with = "all")]
        name: Option<String>,

        /// Test every enabled connection (the default without a name)
        #[arg(long)]
        all: bool,
    },

    /// List configured connections
    Connections,

    /// Print classified errors from a log file as they appear
    Watch {
        /// Log file to tail
        path: PathBuf,

        /// Read the existing content first instead of starting at the end
        #[arg(long)]
        from_start: bool,
    },
}
