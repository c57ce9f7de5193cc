//! Daemon management handler
//!
//! This module handles the daemon lifecycle commands: start (foreground or
//! detached), stop and status.

use super::super::{CliContext, DaemonAction, DETACHED_ENV};
use crate::daemon::{is_process_running, pid_file_path, VolumeDaemon};
use crate::hardware::{CommandMountExecutor, LsblkHardware};
use crate::shared::VolumeManagerClient;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Handler for daemon operations
pub struct DaemonHandler<'a> {
    context: &'a CliContext,
}

impl<'a> DaemonHandler<'a> {
    pub fn new(context: &'a CliContext) -> Self {
        Self { context }
    }

    pub async fn handle_daemon(&self, action: DaemonAction) -> Result<()> {
        match action {
            DaemonAction::Start { detach: true } => self.start_daemon_detached(),
            DaemonAction::Start { detach: false } => self.start_daemon_foreground().await,
            DaemonAction::Stop => self.handle_daemon_stop().await,
            DaemonAction::Status => self.handle_daemon_status().await,
        }
    }

    /// Ask the daemon to shut down over IPC, falling back to SIGTERM
    pub async fn handle_daemon_stop(&self) -> Result<()> {
        let (pid_file, socket_path) = self.get_daemon_paths()?;

        let Some(pid) = self.check_daemon_process(&pid_file)? else {
            println!("Daemon is not running");
            return Ok(());
        };

        match VolumeManagerClient::connect(&socket_path).await {
            Ok(client) => {
                client.shutdown().await.context("Failed to send shutdown request")?;
                info!("Daemon stop signal sent via IPC");
            }
            Err(e) => {
                warn!("IPC shutdown unavailable ({}), sending SIGTERM to {}", e, pid);
                send_signal(pid, libc::SIGTERM)?;
            }
        }

        if wait_for_exit(pid, STOP_TIMEOUT).await {
            println!("Daemon stopped successfully");
            remove_if_exists(&pid_file);
        } else {
            println!("Warning: Daemon may still be running after stop signal");
        }

        Ok(())
    }

    pub async fn handle_daemon_status(&self) -> Result<()> {
        let (pid_file, socket_path) = self.get_daemon_paths()?;

        let Some(pid) = self.check_daemon_process(&pid_file)? else {
            println!("Daemon is not running");
            return Ok(());
        };

        let status = async {
            let client = VolumeManagerClient::connect(&socket_path).await?;
            client.status().await
        };

        match status.await {
            Ok(status) => {
                println!("Daemon is running (PID: {})", pid);
                println!("  Socket: {}", socket_path.display());
                println!("  Clients: {}", status.clients);
                println!("  Volumes: {}", status.volumes);
                println!("  Uptime: {} seconds", status.uptime_secs);
            }
            Err(e) => {
                println!("Daemon is running (PID: {}) - IPC communication failed: {}", pid, e);
            }
        }

        Ok(())
    }

    /// Re-execute this binary as a session leader running the daemon
    fn start_daemon_detached(&self) -> Result<()> {
        let (pid_file, _) = self.get_daemon_paths()?;
        self.ensure_not_running(&pid_file)?;

        println!("Starting daemon in detached mode...");

        let current_exe = std::env::current_exe().context("Failed to get current executable path")?;
        let mut command = process::Command::new(&current_exe);
        if let Some(dir) = &self.context.base_dir {
            command.arg("--config-dir").arg(dir);
        }
        if self.context.verbose {
            command.arg("--verbose");
        }

        let mut child = command
            .args(["daemon", "start"])
            .env(DETACHED_ENV, "1")
            .stdin(process::Stdio::null())
            .stdout(process::Stdio::null())
            .stderr(process::Stdio::null())
            .spawn()
            .context("Failed to spawn daemon process")?;

        // A child that fails on startup (bad config, socket in use) exits quickly
        std::thread::sleep(Duration::from_millis(500));

        match child.try_wait()? {
            Some(exit_status) => {
                anyhow::bail!("Daemon process exited immediately: {}", exit_status);
            }
            None => println!("Daemon started successfully with PID: {}", child.id()),
        }

        Ok(())
    }

    async fn start_daemon_foreground(&self) -> Result<()> {
        let is_detached = std::env::var_os(DETACHED_ENV).is_some();
        let (pid_file, socket_path) = self.get_daemon_paths()?;

        // The detaching parent already checked
        if !is_detached {
            self.ensure_not_running(&pid_file)?;
            println!("Starting daemon in foreground...");
        } else {
            // SAFETY: setsid has no preconditions; failure is reported via -1
            if unsafe { libc::setsid() } == -1 {
                anyhow::bail!("Failed to create new session");
            }
        }

        std::fs::write(&pid_file, process::id().to_string()).context("Failed to write PID file")?;
        info!("Daemon started with PID: {}", process::id());

        let _guard = scopeguard::guard((socket_path.clone(), pid_file), |(socket, pid)| {
            remove_if_exists(&socket);
            remove_if_exists(&pid);
            info!("Daemon cleanup completed");
        });

        self.run_volume_daemon(socket_path).await
    }

    /// Wire the system hardware bridge and executor into the daemon and serve
    async fn run_volume_daemon(&self, socket_path: PathBuf) -> Result<()> {
        let config = self.context.config_manager.config().clone();

        let hardware = Arc::new(LsblkHardware::new());
        match hardware.prime().await {
            Ok(count) => info!("Found {} block devices", count),
            Err(e) => warn!("Initial block device scan failed: {}", e),
        }

        let (signal_sender, signal_receiver) = flume::unbounded();
        let monitor = Arc::clone(&hardware).spawn_monitor(
            Duration::from_millis(config.daemon.poll_interval_ms),
            signal_sender,
        );
        let executor = Arc::new(CommandMountExecutor::new(config.executor.clone()));

        let (shutdown_sender, shutdown_receiver) = flume::bounded::<()>(1);
        tokio::spawn(async move {
            wait_for_termination().await;
            if let Err(e) = shutdown_sender.send_async(()).await {
                warn!("Failed to send shutdown signal: {}", e);
            }
        });

        let daemon = VolumeDaemon::new(config, socket_path, hardware, executor);
        let result = daemon.run(signal_receiver, shutdown_receiver).await;
        monitor.abort();

        result.context("Volume daemon failed")
    }

    /// Get daemon file paths (pid_file, socket_path)
    fn get_daemon_paths(&self) -> Result<(PathBuf, PathBuf)> {
        let socket_path = self.context.socket_path()?;
        Ok((pid_file_path(&socket_path), socket_path))
    }

    fn ensure_not_running(&self, pid_file: &Path) -> Result<()> {
        match self.check_daemon_process(pid_file)? {
            Some(pid) => anyhow::bail!(
                "Daemon is already running with PID: {}. Stop it first with 'volume-manager daemon stop'",
                pid
            ),
            None => {
                debug!("No existing daemon found, proceeding with startup");
                Ok(())
            }
        }
    }

    /// Check daemon process status and clean up stale files
    fn check_daemon_process(&self, pid_file: &Path) -> Result<Option<u32>> {
        if !pid_file.exists() {
            return Ok(None);
        }

        let pid_str = std::fs::read_to_string(pid_file).context("Failed to read PID file")?;

        match pid_str.trim().parse::<u32>() {
            Ok(pid) if is_process_running(pid) => Ok(Some(pid)),
            _ => {
                if let Err(e) = std::fs::remove_file(pid_file) {
                    warn!("Failed to remove stale PID file: {}", e);
                }
                Ok(None)
            }
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn wait_for_termination() {
    let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(signal) => Some(signal),
        Err(e) => {
            warn!("Failed to listen for SIGTERM: {}", e);
            None
        }
    };

    let sigterm = async {
        match terminate.as_mut() {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C signal, stopping daemon"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        },
        _ = sigterm => info!("Received SIGTERM, stopping daemon"),
    }
}

fn send_signal(pid: u32, signal: libc::c_int) -> Result<()> {
    let pid = libc::pid_t::try_from(pid).context("PID out of range")?;
    // SAFETY: kill only reads its arguments
    if unsafe { libc::kill(pid, signal) } == -1 {
        return Err(std::io::Error::last_os_error()).context("Failed to signal daemon process");
    }
    Ok(())
}

async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let start_time = Instant::now();
    while start_time.elapsed() < timeout {
        if !is_process_running(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    !is_process_running(pid)
}

fn remove_if_exists(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

super::traits::impl_context_handler!(DaemonHandler<'a>);
