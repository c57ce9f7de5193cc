//! Volume orchestration
//!
//! [`VolumeManager`] applies hardware signals and client commands to the
//! [`VolumeRegistry`] and raises the resulting events through a
//! [`VolumeEventSink`]. Events are raised while the registry lock is held so
//! that they leave in the order the registry changed; the sink must only
//! enqueue. The lock is never held across an executor call.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{MediaKind, MountedVolume, Volume, VolumeChangeInfo, VolumeRegistry, VolumeState};
use crate::config::PolicyConfig;
use crate::errors::{AppError, AppResult};
use crate::events::{decode_payload, ActionData, Command, EventMask};
use crate::hardware::{launch_service, props, HardwareEventSource, MountExecutor};

/// Receiver of volume events
pub trait VolumeEventSink: Send + Sync {
    /// Hand `info` to every client watching `event`. Must not block.
    fn notify_clients_for_event(&self, event: EventMask, info: &VolumeChangeInfo);

    /// Ask the user how to handle ambiguous media. `Command::Noop` if nobody decides.
    fn request_play_or_mount_from_user(&self, info: &VolumeChangeInfo) -> Command;
}

/// Outcome of `mount_all` / `unmount_all`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolicyDecision {
    Nothing,
    Run(Command),
    AskUser,
}

fn decide(policy: &PolicyConfig, media: MediaKind, mounted: bool) -> PolicyDecision {
    let as_filesystem = if policy.automount_drives && !mounted {
        PolicyDecision::Run(Command::Mount)
    } else {
        PolicyDecision::Nothing
    };

    match media {
        MediaKind::AudioDisc if policy.autoplay_audio_cds => PolicyDecision::Run(Command::Play),
        MediaKind::AudioDisc => PolicyDecision::Nothing,
        MediaKind::MixedDisc if policy.autoplay_audio_cds && policy.autoopen_filesystem => {
            PolicyDecision::AskUser
        }
        MediaKind::MixedDisc if policy.autoplay_audio_cds => PolicyDecision::Run(Command::Play),
        MediaKind::VideoDisc if policy.autoplay_dvds => PolicyDecision::Run(Command::Play),
        _ => as_filesystem,
    }
}

fn fallback_label(device_path: &str) -> String {
    Path::new(device_path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| device_path.to_string())
}

pub struct VolumeManager {
    hardware: Arc<dyn HardwareEventSource>,
    executor: Arc<dyn MountExecutor>,
    sink: Arc<dyn VolumeEventSink>,
    policy: PolicyConfig,
    registry: Mutex<VolumeRegistry>,
}

impl VolumeManager {
    pub fn new(
        hardware: Arc<dyn HardwareEventSource>,
        executor: Arc<dyn MountExecutor>,
        sink: Arc<dyn VolumeEventSink>,
        policy: PolicyConfig,
    ) -> Self {
        VolumeManager {
            hardware,
            executor,
            sink,
            policy,
            registry: Mutex::new(VolumeRegistry::new()),
        }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    fn registry(&self) -> MutexGuard<'_, VolumeRegistry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn raise(&self, event: EventMask, volume: &Volume) {
        debug!("Raising {} for {}", event, volume.udi());
        self.sink.notify_clients_for_event(event, &volume.change_info(event));
    }

    fn media_kind(&self, udi: &str) -> MediaKind {
        let hw = &self.hardware;
        let audio = hw.get_boolean_property(props::DISC_HAS_AUDIO, udi);
        let data = hw.get_boolean_property(props::DISC_HAS_DATA, udi);

        if audio && data {
            MediaKind::MixedDisc
        } else if audio {
            MediaKind::AudioDisc
        } else if hw.get_boolean_property(props::DISC_IS_VIDEODVD, udi) {
            MediaKind::VideoDisc
        } else {
            MediaKind::Filesystem
        }
    }

    /// Mount point the hardware currently reports, if any
    fn current_mount_point(&self, udi: &str) -> Option<String> {
        let hw = &self.hardware;
        if hw.property_exists(props::VOLUME_IS_MOUNTED, udi)
            && !hw.get_boolean_property(props::VOLUME_IS_MOUNTED, udi)
        {
            return None;
        }
        hw.get_string_property(props::VOLUME_MOUNT_POINT, udi)
            .filter(|mount_point| !mount_point.is_empty())
    }

    /// Build a volume from whatever the hardware layer knows about `udi`
    fn probe(&self, udi: &str) -> Volume {
        let device_path = self
            .hardware
            .get_string_property(props::BLOCK_DEVICE, udi)
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| udi.to_string());
        let label = self
            .hardware
            .get_string_property(props::VOLUME_LABEL, udi)
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| fallback_label(&device_path));

        let mut volume = Volume::new(udi, device_path, label, self.media_kind(udi));
        if let Some(mount_point) = self.current_mount_point(udi) {
            if let Err(e) = volume.mark_mounted(mount_point) {
                warn!("{}", e);
            }
        }
        volume
    }

    /// Bring `volume` in line with the mount point the hardware reports
    fn apply_mount_state(&self, volume: &mut Volume, mount_point: Option<String>) {
        match (volume.state(), mount_point) {
            (VolumeState::Attached, Some(mount_point)) => {
                if volume.mark_mounted(mount_point).is_ok() {
                    info!("Volume mounted: {} at {}", volume.udi(), volume.mount_point());
                    self.raise(EventMask::VOLUME_MOUNTED, volume);
                }
            }
            (VolumeState::Mounted, None) => {
                if volume.mark_unmounted().is_ok() {
                    info!("Volume unmounted: {}", volume.udi());
                    self.raise(EventMask::VOLUME_UNMOUNTED, volume);
                    volume.set_should_unmount(false);
                }
            }
            (VolumeState::Mounted, Some(mount_point)) if mount_point != volume.mount_point() => {
                debug!("Volume {} moved to {}", volume.udi(), mount_point);
                if let Err(e) = volume.relocate(mount_point) {
                    warn!("{}", e);
                }
            }
            _ => {}
        }
    }

    fn resolve_udi(registry: &VolumeRegistry, device: &str) -> AppResult<String> {
        registry
            .resolve(device)
            .map(|volume| volume.udi().to_string())
            .ok_or_else(|| AppError::unknown_device(device))
    }

    /// Initial enumeration sweep. Known volumes are registered without
    /// raising events. Returns the number of new volumes.
    pub fn discover(&self) -> usize {
        let found = self.hardware.find_devices_by_capability(props::CAP_VOLUME);
        let mut registry = self.registry();
        let mut added = 0;
        for udi in found {
            if registry.contains(&udi) {
                continue;
            }
            if registry.insert(self.probe(&udi)) {
                added += 1;
            }
        }
        info!("Discovered {} volumes", added);
        added
    }

    /// Handle a hot-plugged device.
    ///
    /// Returns the command the autoplay policy wants run for it, if any.
    pub fn device_added(&self, udi: &str) -> Option<Command> {
        if !self.hardware.has_capability(udi, props::CAP_VOLUME) {
            debug!("Ignoring non-volume device {}", udi);
            return None;
        }

        let volume = self.probe(udi);
        let (decision, info) = {
            let mut registry = self.registry();
            if !registry.insert(volume.clone()) {
                debug!("Device {} already registered", udi);
                return None;
            }
            info!(
                "Volume attached: {} ({}, {}, {})",
                udi,
                volume.label(),
                volume.device_path(),
                volume.media()
            );

            self.raise(EventMask::VOLUME_ATTACHED, &volume);
            if volume.is_mounted() {
                self.raise(EventMask::VOLUME_MOUNTED, &volume);
            }
            if volume.media().is_disc() {
                self.raise(EventMask::MEDIA_INSERTED, &volume);
            }

            (
                decide(&self.policy, volume.media(), volume.is_mounted()),
                volume.change_info(EventMask::MEDIA_INSERTED),
            )
        };

        let command = match decision {
            PolicyDecision::Nothing => Command::Noop,
            PolicyDecision::Run(command) => command,
            PolicyDecision::AskUser => {
                let answer = self.sink.request_play_or_mount_from_user(&info);
                debug!("User chose {} for {}", answer, udi);
                answer
            }
        };

        (command != Command::Noop).then_some(command)
    }

    pub fn device_removed(&self, udi: &str) {
        let mut registry = self.registry();
        let Some(mut volume) = registry.remove(udi) else {
            debug!("Ignoring removal of unknown device {}", udi);
            return;
        };

        if volume.is_mounted() {
            warn!("Volume {} removed while mounted at {}", udi, volume.mount_point());
            if volume.mark_unmounted().is_ok() {
                self.raise(EventMask::VOLUME_UNMOUNTED, &volume);
            }
        }

        if let Err(e) = volume.mark_removed() {
            warn!("{}", e);
        }
        info!("Volume removed: {}", udi);
        self.raise(EventMask::VOLUME_REMOVED, &volume);
    }

    pub fn property_modified(&self, udi: &str, property: &str) {
        match property {
            props::VOLUME_LABEL => {
                let mut registry = self.registry();
                let label = self
                    .hardware
                    .get_string_property(props::VOLUME_LABEL, udi)
                    .filter(|label| !label.trim().is_empty());
                if let (Some(volume), Some(label)) = (registry.get_mut(udi), label) {
                    debug!("Label of {} is now {}", udi, label);
                    volume.set_label(label);
                }
            }
            props::VOLUME_IS_MOUNTED | props::VOLUME_MOUNT_POINT => {
                let mut registry = self.registry();
                let mount_point = self.current_mount_point(udi);
                if let Some(volume) = registry.get_mut(udi) {
                    self.apply_mount_state(volume, mount_point);
                }
            }
            _ => debug!("Ignoring property {} on {}", property, udi),
        }
    }

    /// Mount a volume. Returns the mount point if the hardware already
    /// reports one; otherwise the later property signal completes the
    /// transition.
    pub async fn mount_volume(&self, device: &str) -> AppResult<Option<String>> {
        let (udi, device_path) = {
            let registry = self.registry();
            let udi = Self::resolve_udi(&registry, device)?;
            let Some(volume) = registry.get(&udi) else {
                return Err(AppError::unknown_device(device));
            };
            if volume.is_mounted() {
                debug!("{} is already mounted", udi);
                return Ok(Some(volume.mount_point().to_string()));
            }
            (udi, volume.device_path().to_string())
        };

        if let Err(e) = self.executor.mount(&device_path).await {
            warn!("Mounting {} failed: {}", udi, e);
            return Err(e);
        }

        let mut registry = self.registry();
        let mount_point = self.current_mount_point(&udi);
        if let Some(volume) = registry.get_mut(&udi) {
            self.apply_mount_state(volume, mount_point.clone());
        }
        Ok(mount_point)
    }

    async fn unmount_resolved(&self, udi: &str, device_path: &str) -> AppResult<()> {
        if let Err(e) = self.executor.unmount(device_path).await {
            warn!("Unmounting {} failed: {}", udi, e);
            if let Some(volume) = self.registry().get_mut(udi) {
                volume.set_should_unmount(false);
            }
            return Err(e);
        }

        let mut registry = self.registry();
        if let Some(volume) = registry.get_mut(udi) {
            if volume.mark_unmounted().is_ok() {
                info!("Volume unmounted: {}", udi);
                self.raise(EventMask::VOLUME_UNMOUNTED, volume);
            }
            volume.set_should_unmount(false);
        }
        Ok(())
    }

    pub async fn unmount_volume(&self, device: &str) -> AppResult<()> {
        let (udi, device_path) = {
            let registry = self.registry();
            let udi = Self::resolve_udi(&registry, device)?;
            match registry.get(&udi) {
                Some(volume) if volume.is_mounted() => (udi, volume.device_path().to_string()),
                _ => return Err(AppError::NotMounted { device: udi }),
            }
        };
        self.unmount_resolved(&udi, &device_path).await
    }

    /// Unmount if needed, then eject and forget the volume
    pub async fn eject_volume(&self, device: &str) -> AppResult<()> {
        let (udi, device_path, mounted) = {
            let mut registry = self.registry();
            let udi = Self::resolve_udi(&registry, device)?;
            let Some(volume) = registry.get_mut(&udi) else {
                return Err(AppError::unknown_device(device));
            };
            let mounted = volume.is_mounted();
            if mounted {
                volume.set_should_unmount(true);
            }
            (udi, volume.device_path().to_string(), mounted)
        };

        if mounted {
            self.unmount_resolved(&udi, &device_path).await?;
        }

        if let Err(e) = self.executor.eject(&device_path).await {
            warn!("Ejecting {} failed: {}", udi, e);
            return Err(e);
        }

        let mut registry = self.registry();
        if let Some(mut volume) = registry.remove(&udi) {
            if volume.mark_unmounted().is_ok() {
                self.raise(EventMask::VOLUME_UNMOUNTED, &volume);
            }
            if let Err(e) = volume.mark_removed() {
                warn!("{}", e);
            }
            info!("Volume ejected: {}", udi);
            self.raise(EventMask::VOLUME_REMOVED, &volume);
        }
        Ok(())
    }

    /// Start the configured player or file browser for a volume
    pub fn play_volume(&self, device: &str) -> AppResult<()> {
        let (service, target) = {
            let registry = self.registry();
            let volume = registry
                .resolve(device)
                .ok_or_else(|| AppError::unknown_device(device))?;
            match volume.media() {
                MediaKind::AudioDisc | MediaKind::MixedDisc => (
                    self.policy.autoplay_cda_service.as_str(),
                    volume.device_path().to_string(),
                ),
                MediaKind::VideoDisc => (
                    self.policy.autoplay_dvd_service.as_str(),
                    volume.device_path().to_string(),
                ),
                MediaKind::Filesystem if volume.is_mounted() => (
                    self.policy.autoopen_fs_service.as_str(),
                    volume.mount_point().to_string(),
                ),
                MediaKind::Filesystem => {
                    return Err(AppError::NotMounted {
                        device: volume.udi().to_string(),
                    })
                }
            }
        };

        if service.trim().is_empty() {
            return Err(AppError::NoAutoplayService {
                device: device.to_string(),
            });
        }
        launch_service(service, &target)
    }

    /// Run one command against a device (identifier or block device path)
    pub async fn execute(&self, command: Command, device: &str) -> AppResult<()> {
        debug!("Executing {} on {}", command, device);
        match command {
            Command::Noop => Ok(()),
            Command::Mount => self.mount_volume(device).await.map(|_| ()),
            Command::Unmount => self.unmount_volume(device).await,
            Command::Eject => self.eject_volume(device).await,
            Command::Play => self.play_volume(device),
        }
    }

    /// Run a command chosen by the autoplay policy. Policy mounts open the
    /// file browser afterwards when configured to.
    pub async fn run_policy_command(&self, command: Command, udi: &str) -> AppResult<()> {
        if command != Command::Mount {
            return self.execute(command, udi).await;
        }

        let mount_point = self.mount_volume(udi).await?;
        let service = self.policy.autoopen_fs_service.trim();
        if self.policy.autoopen_filesystem && !service.is_empty() {
            match mount_point {
                Some(mount_point) => launch_service(service, &mount_point)?,
                None => debug!("{} has no mount point yet, not opening it", udi),
            }
        }
        Ok(())
    }

    /// Turn a user's answer to a surfaced action into a command and run it
    pub async fn action_invoked(&self, data: &[u8]) -> AppResult<()> {
        let action: ActionData = decode_payload(data)?;
        let command = Command::from_action_key(&action.action_key);
        info!("Action '{}' invoked for {}", action.action_key, action.device);
        self.execute(command, &action.device).await
    }

    pub async fn mount_all(&self) -> BatchReport {
        let targets: Vec<String> = self
            .registry()
            .iter()
            .filter(|volume| volume.state() == VolumeState::Attached && volume.media().is_mountable())
            .map(|volume| volume.udi().to_string())
            .collect();

        let mut report = BatchReport::default();
        for udi in targets {
            match self.mount_volume(&udi).await {
                Ok(_) => report.succeeded.push(udi),
                Err(e) => report.failed.push((udi, e.to_string())),
            }
        }
        info!(
            "Mount all: {} succeeded, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }

    /// Unmount every mounted volume on the daemon's behalf
    pub async fn unmount_all(&self) -> BatchReport {
        let targets: Vec<(String, String)> = {
            let mut registry = self.registry();
            registry
                .iter_mut()
                .filter(|volume| volume.is_mounted())
                .map(|volume| {
                    volume.set_should_unmount(true);
                    (volume.udi().to_string(), volume.device_path().to_string())
                })
                .collect()
        };

        let mut report = BatchReport::default();
        for (udi, device_path) in targets {
            match self.unmount_resolved(&udi, &device_path).await {
                Ok(()) => report.succeeded.push(udi),
                Err(e) => report.failed.push((udi, e.to_string())),
            }
        }
        info!(
            "Unmount all: {} succeeded, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }

    pub fn get_mounted_volumes(&self) -> BTreeMap<String, MountedVolume> {
        self.registry().mounted()
    }

    pub fn volume(&self, device: &str) -> Option<Volume> {
        self.registry().resolve(device).cloned()
    }

    pub fn volume_count(&self) -> usize {
        self.registry().len()
    }
}
