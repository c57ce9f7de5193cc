//! Command definitions and structures for the CLI
//!
//! This module contains all the clap-based command line argument definitions,
//! including the main CLI structure and all subcommands.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Main CLI structure
#[derive(Parser)]
#[command(name = "volume-manager")]
#[command(about = "Removable volume session daemon and client")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Use `<DIR>/.volume-manager` for configuration, socket and PID file
    #[arg(long, global = true, env = "VOLUME_MANAGER_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration with the defaults
        #[arg(short, long)]
        force: bool,
    },

    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Daemon management
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// List mounted volumes
    List,

    /// Print volume notifications as they arrive
    Watch {
        /// Comma separated events: all, mounted, unmounted, attached, removed, media-inserted
        #[arg(short, long, default_value = "all")]
        events: String,

        /// Handlebars template used for every notification
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Mount a volume
    Mount {
        /// Device path (e.g. /dev/sdb1) or device identifier
        device: String,
    },

    /// Unmount a volume
    Unmount {
        /// Device path (e.g. /dev/sdb1) or device identifier
        device: String,
    },

    /// Unmount if needed, then eject a volume
    Eject {
        /// Device path (e.g. /dev/sdb1) or device identifier
        device: String,
    },

    /// Launch the configured player or file browser for a volume
    Play {
        /// Device path (e.g. /dev/sdb1) or device identifier
        device: String,
    },
}

/// Configuration management actions
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Configuration key (e.g., policy.autoplay_dvds)
        key: String,
        /// Value to set
        value: String,
    },

    /// Get configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// List the keys accepted by get and set
    Keys,
}

/// Daemon management actions
#[derive(Subcommand)]
pub enum DaemonAction {
    /// Start the daemon
    Start {
        /// Run in detached mode (background)
        #[arg(short = 'd', long)]
        detach: bool,
    },

    /// Stop the daemon
    Stop,

    /// Check daemon status
    Status,
}
