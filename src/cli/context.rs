//! CLI Context for dependency injection and shared state
//!
//! This module provides the CliContext abstraction that centralizes
//! configuration management and reduces coupling in CLI handlers.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::ConfigManager;
use crate::daemon::create_socket_path;

const LOCAL_DIR_NAME: &str = ".volume-manager";

/// Where log output goes for this invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Short-lived client commands: stderr only
    Console,
    /// Daemon attached to a terminal: stderr plus the configured log file
    Foreground,
    /// Daemon without a terminal: the configured log file only
    Detached,
}

/// CLI execution context containing shared dependencies and configuration
#[derive(Clone)]
pub struct CliContext {
    /// Directory given with `--config-dir`, before `.volume-manager` is appended
    pub base_dir: Option<PathBuf>,
    /// Resolved directory holding `config.toml`, or `None` for the per-user one
    pub config_dir: Option<PathBuf>,
    pub verbose: bool,
    pub config_manager: Arc<ConfigManager>,
}

impl CliContext {
    pub fn new(base_dir: Option<PathBuf>, verbose: bool) -> Result<Self> {
        if let Some(dir) = &base_dir {
            if !dir.is_dir() {
                anyhow::bail!("Config directory does not exist: {}", dir.display());
            }
        }

        let config_dir = Self::resolve_config_dir(base_dir.as_deref());
        let config_manager = Arc::new(
            ConfigManager::load(config_dir.clone()).context("Failed to load configuration")?,
        );

        Ok(Self {
            base_dir,
            config_dir,
            verbose,
            config_manager,
        })
    }

    /// `<dir>/.volume-manager` when a directory is given; otherwise the
    /// current directory's `.volume-manager` if it already holds a config
    fn resolve_config_dir(base_dir: Option<&Path>) -> Option<PathBuf> {
        if let Some(dir) = base_dir {
            return Some(dir.join(LOCAL_DIR_NAME));
        }

        if let Ok(current_dir) = std::env::current_dir() {
            let local = current_dir.join(LOCAL_DIR_NAME);
            if local.join("config.toml").exists() {
                return Some(local);
            }
        }

        None
    }

    /// Daemon socket for this context: the configured path, else next to a
    /// local config, else the per-user runtime directory
    pub fn socket_path(&self) -> Result<PathBuf> {
        let configured = self.config_manager.config().daemon.socket_path.as_deref();
        create_socket_path(configured, self.config_dir.as_deref())
            .context("Failed to resolve daemon socket path")
    }

    /// Initialize logging subsystem based on verbosity and configuration.
    ///
    /// The returned guard flushes the log file and must live until exit.
    pub fn init_logging(&self, mode: LogMode) -> Result<Option<WorkerGuard>> {
        let daemon = &self.config_manager.config().daemon;
        let log_level = if self.verbose { "debug" } else { daemon.log_level.as_str() };
        let env_filter = EnvFilter::from_default_env()
            .add_directive(log_level.parse().unwrap_or_else(|_| tracing::Level::INFO.into()));

        let log_path = match (mode, &daemon.log_path) {
            (LogMode::Console, _) | (_, None) => None,
            (_, Some(path)) => Some(PathBuf::from(path)),
        };

        let Some(log_path) = log_path else {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(env_filter)
                .init();
            return Ok(None);
        };

        let directory = log_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(directory).context("Failed to create log directory")?;
        let file_name = log_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("daemon.log"));

        let file_appender = tracing_appender::rolling::daily(directory, file_name);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
        // No terminal to write to once detached
        file_subscriber(env_filter, file_writer, mode != LogMode::Detached).init();

        tracing::debug!("Logging to {}", log_path.display());
        Ok(Some(guard))
    }
}

/// Subscriber writing to `file_writer`, and to stderr when `console` is set
fn file_subscriber<W>(
    env_filter: EnvFilter,
    file_writer: W,
    console: bool,
) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false);
    let console_layer = console.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_context_creation() {
        let temp_dir = TempDir::new().unwrap();
        let context = CliContext::new(Some(temp_dir.path().to_path_buf()), false).unwrap();

        assert_eq!(context.config_dir, Some(temp_dir.path().join(".volume-manager")));
        assert!(!context.verbose);
        assert!(context.config_manager.config().policy.automount_drives);
        // Loading alone never writes a config file
        assert!(!temp_dir.path().join(".volume-manager").join("config.toml").exists());
    }

    #[test]
    fn test_missing_config_dir_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("does-not-exist");
        assert!(CliContext::new(Some(missing), false).is_err());
    }

    #[test]
    fn test_socket_lives_next_to_local_config() {
        let temp_dir = TempDir::new().unwrap();
        let context = CliContext::new(Some(temp_dir.path().to_path_buf()), true).unwrap();

        assert!(context.verbose);
        assert_eq!(
            context.socket_path().unwrap(),
            temp_dir.path().join(".volume-manager").join("daemon.sock")
        );
    }

    #[test]
    fn test_file_subscriber_writes_with_and_without_console() {
        let temp_dir = TempDir::new().unwrap();

        for (name, console) in [("foreground.log", true), ("detached.log", false)] {
            let path = temp_dir.path().join(name);
            let file = std::fs::File::create(&path).unwrap();
            let (writer, guard) = tracing_appender::non_blocking(file);

            let subscriber = file_subscriber(EnvFilter::new("info"), writer, console);
            tracing::subscriber::with_default(subscriber, || {
                tracing::info!("volume attached");
                tracing::debug!("filtered out");
            });
            drop(guard);

            let written = std::fs::read_to_string(&path).unwrap();
            assert!(written.contains("volume attached"), "{name}: {written}");
            assert!(!written.contains("filtered out"));
        }
    }
}
