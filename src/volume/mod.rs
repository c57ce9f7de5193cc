//! Volume state
//!
//! A [`Volume`] is the daemon's view of one mountable device. The registry
//! and the manager that drives it live in the submodules.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{AppError, AppResult};
use crate::events::EventMask;

pub mod manager;
pub mod registry;

pub use manager::{BatchReport, VolumeEventSink, VolumeManager};
pub use registry::VolumeRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeState {
    Attached,
    Mounted,
    Removed,
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VolumeState::Attached => "attached",
            VolumeState::Mounted => "mounted",
            VolumeState::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// What kind of content the medium carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MediaKind {
    #[default]
    Filesystem,
    AudioDisc,
    MixedDisc,
    VideoDisc,
}

impl MediaKind {
    pub fn is_disc(self) -> bool {
        !matches!(self, MediaKind::Filesystem)
    }

    /// Audio-only discs carry no filesystem to mount
    pub fn is_mountable(self) -> bool {
        !matches!(self, MediaKind::AudioDisc)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaKind::Filesystem => "filesystem",
            MediaKind::AudioDisc => "audio-cd",
            MediaKind::MixedDisc => "mixed-cd",
            MediaKind::VideoDisc => "dvd",
        };
        f.write_str(name)
    }
}

/// Payload of a `volumeDidChange` notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeChangeInfo {
    pub event: u32,
    pub device: String,
    pub label: String,
    pub mount_point: String,
    pub device_path: String,
    /// Set when the daemon, not the user, decided to unmount
    pub daemon_initiated: bool,
    pub media: MediaKind,
    pub timestamp: DateTime<Local>,
}

impl VolumeChangeInfo {
    pub fn event(&self) -> EventMask {
        EventMask::from_bits(self.event)
    }
}

/// Entry of the mounted-volumes snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountedVolume {
    pub label: String,
    pub mount_point: String,
}

/// One device known to the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    udi: String,
    label: String,
    mount_point: String,
    device_path: String,
    should_unmount: bool,
    media: MediaKind,
    state: VolumeState,
}

impl Volume {
    /// A freshly attached, unmounted volume
    pub fn new(
        udi: impl Into<String>,
        device_path: impl Into<String>,
        label: impl Into<String>,
        media: MediaKind,
    ) -> Self {
        Volume {
            udi: udi.into(),
            label: label.into(),
            mount_point: String::new(),
            device_path: device_path.into(),
            should_unmount: false,
            media,
            state: VolumeState::Attached,
        }
    }

    pub fn udi(&self) -> &str {
        &self.udi
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn media(&self) -> MediaKind {
        self.media
    }

    pub fn state(&self) -> VolumeState {
        self.state
    }

    pub fn should_unmount(&self) -> bool {
        self.should_unmount
    }

    pub fn is_mounted(&self) -> bool {
        self.state == VolumeState::Mounted
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn set_should_unmount(&mut self, value: bool) {
        self.should_unmount = value;
    }

    fn invalid(&self, to: VolumeState) -> AppError {
        AppError::InvalidTransition {
            device: self.udi.clone(),
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    /// Attached -> Mounted
    pub fn mark_mounted(&mut self, mount_point: impl Into<String>) -> AppResult<()> {
        let mount_point = mount_point.into();
        if self.state != VolumeState::Attached || mount_point.is_empty() {
            return Err(self.invalid(VolumeState::Mounted));
        }
        self.mount_point = mount_point;
        self.state = VolumeState::Mounted;
        Ok(())
    }

    /// Update the mount point of a volume that stays mounted
    pub fn relocate(&mut self, mount_point: impl Into<String>) -> AppResult<()> {
        let mount_point = mount_point.into();
        if self.state != VolumeState::Mounted || mount_point.is_empty() {
            return Err(self.invalid(VolumeState::Mounted));
        }
        self.mount_point = mount_point;
        Ok(())
    }

    /// Mounted -> Attached
    pub fn mark_unmounted(&mut self) -> AppResult<()> {
        if self.state != VolumeState::Mounted {
            return Err(self.invalid(VolumeState::Attached));
        }
        self.mount_point.clear();
        self.state = VolumeState::Attached;
        Ok(())
    }

    /// Attached -> Removed. A mounted volume has to be unmounted first.
    pub fn mark_removed(&mut self) -> AppResult<()> {
        if self.state != VolumeState::Attached {
            return Err(self.invalid(VolumeState::Removed));
        }
        self.state = VolumeState::Removed;
        Ok(())
    }

    pub fn change_info(&self, event: EventMask) -> VolumeChangeInfo {
        VolumeChangeInfo {
            event: event.bits(),
            device: self.udi.clone(),
            label: self.label.clone(),
            mount_point: self.mount_point.clone(),
            device_path: self.device_path.clone(),
            daemon_initiated: self.should_unmount,
            media: self.media,
            timestamp: Local::now(),
        }
    }

    pub fn mounted_entry(&self) -> MountedVolume {
        MountedVolume {
            label: self.label.clone(),
            mount_point: self.mount_point.clone(),
        }
    }
}
