//! Command handlers for all CLI operations
//!
//! This module routes parsed commands to the handler owning them, keeping
//! clap parsing apart from daemon and client logic.

pub(crate) mod traits;

mod config;
mod daemon;
mod volumes;

pub use config::ConfigHandler;
pub use daemon::DaemonHandler;
pub use volumes::VolumeHandler;

use super::{CliContext, Commands};
use crate::events::Command;
use anyhow::Result;
use traits::HandlerBuilder;

/// Coordinates all command handling operations with dependency injection via CliContext
pub struct CommandHandler {
    context: CliContext,
}

impl CommandHandler {
    pub fn new(context: CliContext) -> Self {
        Self { context }
    }

    /// Route commands to their appropriate handlers
    pub async fn handle_command(&self, command: Commands) -> Result<()> {
        let builder = HandlerBuilder::new(&self.context);

        match command {
            Commands::Init { force } => {
                builder.create_with_context::<ConfigHandler>().handle_init(force)
            }
            Commands::Config { action } => {
                builder.create_with_context::<ConfigHandler>().handle_config(action)
            }
            Commands::Daemon { action } => {
                builder
                    .create_with_context::<DaemonHandler>()
                    .handle_daemon(action)
                    .await
            }
            Commands::List => builder.create_with_context::<VolumeHandler>().handle_list().await,
            Commands::Watch { events, format } => {
                builder
                    .create_with_context::<VolumeHandler>()
                    .handle_watch(&events, format.as_deref())
                    .await
            }
            Commands::Mount { device } => self.run_volume_command(Command::Mount, &device).await,
            Commands::Unmount { device } => self.run_volume_command(Command::Unmount, &device).await,
            Commands::Eject { device } => self.run_volume_command(Command::Eject, &device).await,
            Commands::Play { device } => self.run_volume_command(Command::Play, &device).await,
        }
    }

    async fn run_volume_command(&self, command: Command, device: &str) -> Result<()> {
        HandlerBuilder::new(&self.context)
            .create_with_context::<VolumeHandler>()
            .handle_volume_command(command, device)
            .await
    }
}
