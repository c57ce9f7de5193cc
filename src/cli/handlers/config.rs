//! Configuration management handler
//!
//! Handles `init` and the `config` subcommands.

use super::super::{CliContext, ConfigAction};
use crate::config::{Config, ConfigManager, VALID_CONFIG_KEYS};
use anyhow::{Context, Result};

/// Handler for configuration operations
pub struct ConfigHandler<'a> {
    context: &'a CliContext,
}

impl<'a> ConfigHandler<'a> {
    pub fn new(context: &'a CliContext) -> Self {
        Self { context }
    }

    /// Write the default configuration unless one exists and `force` is unset
    pub fn handle_init(&self, force: bool) -> Result<()> {
        let config_dir = self.context.config_dir.clone();
        let config_path = ConfigManager::get_config_path(config_dir.clone())?;

        if config_path.exists() && !force {
            println!("Configuration already initialized at: {}", config_path.display());
            println!("Use --force to overwrite");
            return Ok(());
        }

        let mut config_manager = ConfigManager::load(config_dir)?;
        *config_manager.config_mut() = Config::default();
        config_manager
            .save()
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        println!("Configuration initialized successfully at: {}", config_path.display());
        println!();
        println!("Start the daemon with:");
        println!("  volume-manager daemon start      # foreground");
        println!("  volume-manager daemon start -d   # background");
        Ok(())
    }

    pub fn handle_config(&self, action: ConfigAction) -> Result<()> {
        match action {
            ConfigAction::Show => {
                let config = self.context.config_manager.config();
                println!("{}", toml::to_string_pretty(config)?);
            }
            ConfigAction::Get { key } => {
                let value = self.context.config_manager.get(&key)?;
                println!("{value}");
            }
            ConfigAction::Set { key, value } => {
                let mut config_manager = ConfigManager::load(self.context.config_dir.clone())?;
                config_manager.set(&key, &value)?;
                config_manager.save()?;
                println!("Configuration updated: {key} = {value}");
            }
            ConfigAction::Keys => {
                for key in VALID_CONFIG_KEYS {
                    println!("{key}");
                }
            }
        }

        Ok(())
    }
}

super::traits::impl_context_handler!(ConfigHandler<'a>);
