//! Mount executor backed by system tools
//!
//! Mounting and unmounting go through `udisksctl` so an unprivileged session
//! daemon can act on removable media; ejecting uses `eject`.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use super::MountExecutor;
use crate::config::ExecutorConfig;
use crate::errors::{AppError, AppResult};

/// Runs the configured programs for mount, unmount and eject
#[derive(Debug, Clone)]
pub struct CommandMountExecutor {
    config: ExecutorConfig,
}

impl CommandMountExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    async fn run(&self, operation: &str, argv: &[String], device: &str) -> AppResult<()> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AppError::config(format!("no program configured for {operation}")))?;

        debug!("Running {} {:?} {}", program, args, device);

        let output = Command::new(program)
            .args(args)
            .arg(device)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AppError::mount_operation_with_source(device, operation, format!("failed to run {program}"), e))?;

        if output.status.success() {
            info!("{} succeeded for {}", operation, device);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(AppError::mount_operation(
                device,
                operation,
                format!("{program} exited with {}: {}", output.status, stderr.trim()),
            ))
        }
    }
}

#[async_trait]
impl MountExecutor for CommandMountExecutor {
    async fn mount(&self, device: &str) -> AppResult<()> {
        self.run("mount", &self.config.mount_command, device).await
    }

    async fn unmount(&self, device: &str) -> AppResult<()> {
        self.run("unmount", &self.config.unmount_command, device).await
    }

    async fn eject(&self, device: &str) -> AppResult<()> {
        self.run("eject", &self.config.eject_command, device).await
    }
}

/// Start an external service (player, file browser) on `target` without
/// waiting for it to exit.
pub fn launch_service(program: &str, target: &str) -> AppResult<()> {
    let mut parts = program.split_whitespace();
    let executable = parts
        .next()
        .ok_or_else(|| AppError::config("empty service command"))?;

    let child = std::process::Command::new(executable)
        .args(parts)
        .arg(target)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| AppError::ProcessExecution {
            command: program.to_string(),
            source: Some(Box::new(e)),
        })?;

    info!("Launched '{}' (PID {}) for {}", program, child.id(), target);
    Ok(())
}
