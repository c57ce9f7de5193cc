//! Client commands: list, watch and the per-volume commands

use super::super::CliContext;
use crate::events::{Command, EventMask};
use crate::shared::{NotificationFormatter, VolumeManagerClient};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// Mounting optical media can spin up a drive; give the daemon time
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Handler talking to a running daemon as an ordinary client
pub struct VolumeHandler<'a> {
    context: &'a CliContext,
}

impl<'a> VolumeHandler<'a> {
    pub fn new(context: &'a CliContext) -> Self {
        Self { context }
    }

    async fn connect(&self) -> Result<VolumeManagerClient> {
        let socket_path = self.context.socket_path()?;
        let max_frame_size = self.context.config_manager.config().daemon.max_frame_size;
        VolumeManagerClient::connect_with(&socket_path, max_frame_size)
            .await
            .with_context(|| {
                format!(
                    "Cannot reach the daemon at {}; is it running? (volume-manager daemon start)",
                    socket_path.display()
                )
            })
    }

    /// Token identifying this process's client object on its connection
    fn client_token() -> u32 {
        std::process::id()
    }

    pub async fn handle_list(&self) -> Result<()> {
        let client = self.connect().await?;
        let volumes = client.get_mounted_volumes().await?;

        if volumes.is_empty() {
            println!("No mounted volumes");
            return Ok(());
        }

        for (device, volume) in &volumes {
            println!("{}\t{}\t{}", device, volume.label, volume.mount_point);
        }
        Ok(())
    }

    /// Subscribe to `events` and print each notification until Ctrl+C
    pub async fn handle_watch(&self, events: &str, format: Option<&str>) -> Result<()> {
        let mask = EventMask::parse_list(events)?;
        if mask.is_empty() {
            anyhow::bail!("No events selected");
        }

        let formatter = match format {
            Some(template) => NotificationFormatter::with_template(template)?,
            None => NotificationFormatter::new()?,
        };

        let client = self.connect().await?;
        let token = Self::client_token();
        client.register_client(token).await?;
        client.add_watcher_for_events(token, mask).await?;
        debug!("Watching {:#x} as client {}", mask.bits(), token);

        let notifications = client.notifications().clone();
        loop {
            tokio::select! {
                received = notifications.recv_async() => {
                    let Ok(notification) = received else {
                        println!("Daemon closed the connection");
                        return Ok(());
                    };
                    match formatter.render(&notification.info) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!("Failed to render notification: {}", e),
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        if let Err(e) = client.unregister_client(token).await {
            debug!("Unregister on exit failed: {}", e);
        }
        Ok(())
    }

    pub async fn handle_volume_command(&self, command: Command, device: &str) -> Result<()> {
        let client = self.connect().await?;
        let token = Self::client_token();
        client.register_client(token).await?;

        let result = client
            .execute_and_wait(token, command, device, COMMAND_TIMEOUT)
            .await;

        if let Err(e) = client.unregister_client(token).await {
            debug!("Unregister failed: {}", e);
        }
        result?;

        if command == Command::Mount {
            let mounted = client.get_mounted_volumes().await?;
            // Keyed by device identifier; the mount point may also arrive later
            match mounted.get(device) {
                Some(volume) => println!("Mounted {} at {}", device, volume.mount_point),
                None => println!("Mounted {}", device),
            }
        } else {
            println!("{} {}: done", command, device);
        }
        Ok(())
    }
}

super::traits::impl_context_handler!(VolumeHandler<'a>);
