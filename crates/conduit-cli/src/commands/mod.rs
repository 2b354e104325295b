//! Command handlers

pub mod connections;
pub mod run;
pub mod test;
pub mod watch;

use crate::args::{Cli, Commands};
use crate::console::CliConsole;
use conduit_core::config::ConduitConfig;

/// Dispatch a parsed command; `Ok(false)` means it ran but reported failures
pub async fn route(cli: Cli, config: ConduitConfig) -> anyhow::Result<bool> {
    let console = CliConsole::new(cli.json);
    match cli.command {
        Commands::Run { watch, notify } => run::run(config, watch, notify, &console).await,
        Commands::Test { name, all: _ } => test::test(&config, name, &console).await,
        Commands::Connections => connections::list(&config, &console).await,
        Commands::Watch { path, from_start } => watch::watch(&config, path, from_start, &console).await,
    }
}
