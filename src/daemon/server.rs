use flume::Receiver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::connection::{ClientRegistry, ConnectionManager, DecisionProvider, NoDecision};
use super::ipc_server::IpcServer;
use crate::config::Config;
use crate::errors::AppResult;
use crate::hardware::{HardwareEventSource, HardwareSignal, MountExecutor};
use crate::volume::VolumeManager;

/// The session daemon: volume state, client registry and IPC server
pub struct VolumeDaemon {
    config: Config,
    socket_path: PathBuf,
    manager: Arc<ConnectionManager>,
}

impl VolumeDaemon {
    pub fn new(
        config: Config,
        socket_path: PathBuf,
        hardware: Arc<dyn HardwareEventSource>,
        executor: Arc<dyn MountExecutor>,
    ) -> Self {
        Self::with_decision_provider(config, socket_path, hardware, executor, Arc::new(NoDecision))
    }

    pub fn with_decision_provider(
        config: Config,
        socket_path: PathBuf,
        hardware: Arc<dyn HardwareEventSource>,
        executor: Arc<dyn MountExecutor>,
        decisions: Arc<dyn DecisionProvider>,
    ) -> Self {
        let clients = Arc::new(ClientRegistry::new(decisions));
        let volumes = Arc::new(VolumeManager::new(
            hardware,
            executor,
            clients.clone(),
            config.policy.clone(),
        ));

        VolumeDaemon {
            config,
            socket_path,
            manager: Arc::new(ConnectionManager::new(clients, volumes)),
        }
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve until `shutdown` fires or a client asks the daemon to stop.
    ///
    /// `signals` carries hot-plug and property notifications from the
    /// hardware layer; they are applied in arrival order.
    pub async fn run(self, signals: Receiver<HardwareSignal>, shutdown: Receiver<()>) -> AppResult<()> {
        let volumes = Arc::clone(self.manager.volumes());

        let found = volumes.discover();
        info!("Volume daemon starting with {} volumes", found);
        if self.config.policy.automount_drives {
            let report = volumes.mount_all().await;
            for (device, reason) in &report.failed {
                warn!("Automount of {} failed: {}", device, reason);
            }
        }

        let (request_tx, request_rx) = flume::unbounded();
        let (stop_tx, stop_rx) = flume::bounded(1);
        let server = IpcServer::bind(
            &self.socket_path,
            Arc::clone(&self.manager),
            request_tx,
            self.config.daemon.max_frame_size,
        )?;
        let server_task = tokio::spawn(server.run(stop_rx));
        let pump_task = tokio::spawn(pump_hardware_signals(Arc::clone(&volumes), signals));

        tokio::select! {
            _ = shutdown.recv_async() => info!("Shutdown requested"),
            _ = request_rx.recv_async() => info!("Shutdown requested by client"),
        }

        let _ = stop_tx.send(());
        match server_task.await {
            Ok(Err(e)) => error!("IPC server failed: {}", e),
            Err(e) => error!("IPC server task failed: {}", e),
            Ok(Ok(())) => {}
        }
        pump_task.abort();

        if self.config.policy.unmount_on_exit {
            let report = volumes.unmount_all().await;
            info!("Unmounted {} volumes on exit", report.succeeded.len());
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!("Could not remove socket {}: {}", self.socket_path.display(), e);
        }
        info!("Volume daemon stopped");
        Ok(())
    }
}

/// Apply hardware signals to the volume manager. Commands chosen by the
/// autoplay policy run in their own tasks so a slow mount never delays the
/// next signal.
pub async fn pump_hardware_signals(volumes: Arc<VolumeManager>, signals: Receiver<HardwareSignal>) {
    while let Ok(signal) = signals.recv_async().await {
        debug!("Hardware signal: {:?}", signal);
        match signal {
            HardwareSignal::DeviceAdded(udi) => {
                if let Some(command) = volumes.device_added(&udi) {
                    let volumes = Arc::clone(&volumes);
                    tokio::spawn(async move {
                        if let Err(e) = volumes.run_policy_command(command, &udi).await {
                            warn!("Policy {} for {} failed: {}", command, udi, e);
                        }
                    });
                }
            }
            HardwareSignal::DeviceRemoved(udi) => volumes.device_removed(&udi),
            HardwareSignal::PropertyModified { device, property } => {
                volumes.property_modified(&device, &property)
            }
        }
    }
    debug!("Hardware signal stream ended");
}
