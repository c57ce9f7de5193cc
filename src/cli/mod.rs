//! CLI module providing command-line interface functionality
//!
//! This module handles argument parsing and routes each command to its
//! handler. The same binary is the daemon (`daemon start`) and its clients.

pub mod commands;
pub mod context;
pub mod handlers;

use anyhow::Result;
use clap::Parser;

pub use commands::{Cli, Commands, ConfigAction, DaemonAction};
pub use context::{CliContext, LogMode};
pub use handlers::CommandHandler;

/// Set in the environment of a daemon re-executed by `daemon start -d`
pub const DETACHED_ENV: &str = "VOLUME_MANAGER_DETACHED";

pub struct CliApp;

impl CliApp {
    /// Parse command line arguments and execute the requested command
    pub async fn run() -> Result<()> {
        let cli = Cli::parse();

        let context = CliContext::new(cli.config_dir.clone(), cli.verbose)?;
        let _log_guard = context.init_logging(Self::log_mode(&cli.command))?;

        let handler = CommandHandler::new(context);
        handler.handle_command(cli.command).await
    }

    fn log_mode(command: &Commands) -> LogMode {
        match command {
            Commands::Daemon {
                action: DaemonAction::Start { detach: false },
            } => {
                if std::env::var_os(DETACHED_ENV).is_some() {
                    LogMode::Detached
                } else {
                    LogMode::Foreground
                }
            }
            _ => LogMode::Console,
        }
    }
}
