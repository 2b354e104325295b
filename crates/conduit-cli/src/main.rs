//! Conduit CLI
//!
//! Keeps JSON-RPC connections to assistant processes alive and forwards
//! errors found in application logs to them.
//!
//! # Commands
//!
//! - `conduit run`: start every enabled connection, monitor health, watch the
//!   configured log file and forward errors until SIGINT/SIGTERM
//! - `conduit test [NAME]`: connect, ping, report and disconnect
//! - `conduit connections`: list configured connections
//! - `conduit watch PATH`: print classified errors from a log file
//!
//! Configuration is read from `conduit.toml` (or `--config`), JSON, TOML or
//! YAML by extension, with `CONDUIT_*` environment overrides. Logs go to
//! stderr; set `RUST_LOG` to override the configured level.

mod args;
mod commands;
mod console;
mod logging;
mod signal_handler;

use args::Cli;
use clap::Parser;
use conduit_core::config::ConduitConfig;
use console::CliConsole;
use std::process::ExitCode;
use tracing::warn;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ConduitConfig::read(Some(cli.config.as_path())) {
        Ok(config) => config,
        Err(e) => {
            CliConsole::new(false).error(&format!("Failed to load configuration: {}", e));
            return ExitCode::from(2);
        }
    };
    logging::init(&config.logging, cli.verbose);

    match config.validate() {
        Ok(warnings) => {
            for warning in warnings {
                warn!("{}", warning);
            }
        }
        Err(e) => {
            CliConsole::new(false).error(&format!("Invalid configuration: {}", e));
            return ExitCode::from(2);
        }
    }

    match commands::route(cli, config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            CliConsole::new(false).error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}
