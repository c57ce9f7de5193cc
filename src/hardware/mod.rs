//! Boundary to the hardware layer
//!
//! The volume manager never talks to a device service directly. It depends on
//! two traits:
//! - [`HardwareEventSource`] answers property queries about devices
//! - [`MountExecutor`] performs mount, unmount and eject
//!
//! Hot-plug and property-change notifications arrive as [`HardwareSignal`]
//! values on a channel owned by whoever drives the daemon.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;

pub mod executor;
pub mod lsblk;
pub mod memory;

pub use executor::{launch_service, CommandMountExecutor};
pub use lsblk::LsblkHardware;
pub use memory::{ExecutorCall, MemoryDevice, MemoryHardware, RecordingExecutor};

/// Property keys understood by the volume manager (HAL naming)
pub mod props {
    pub const CAPABILITIES: &str = "info.capabilities";
    pub const BLOCK_DEVICE: &str = "block.device";
    pub const VOLUME_LABEL: &str = "volume.label";
    pub const VOLUME_MOUNT_POINT: &str = "volume.mount_point";
    pub const VOLUME_IS_MOUNTED: &str = "volume.is_mounted";
    pub const DISC_HAS_AUDIO: &str = "volume.disc.has_audio";
    pub const DISC_HAS_DATA: &str = "volume.disc.has_data";
    pub const DISC_IS_VIDEODVD: &str = "volume.disc.is_videodvd";

    /// Capability advertised by mountable volumes
    pub const CAP_VOLUME: &str = "volume";
}

/// Asynchronous notification from the hardware layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareSignal {
    DeviceAdded(String),
    DeviceRemoved(String),
    PropertyModified { device: String, property: String },
}

/// Point queries against the hardware layer.
///
/// Lookups never fail loudly: a missing property or a failed query reads as
/// `None`, `false` or an empty list and the caller proceeds with defaults.
pub trait HardwareEventSource: Send + Sync {
    fn find_devices_by_capability(&self, capability: &str) -> Vec<String>;

    fn get_string_property(&self, property: &str, device: &str) -> Option<String>;

    fn get_boolean_property(&self, property: &str, device: &str) -> bool;

    fn get_strlist_property(&self, property: &str, device: &str) -> Vec<String>;

    fn property_exists(&self, property: &str, device: &str) -> bool;

    /// True if the device advertises `capability` in `info.capabilities`
    fn has_capability(&self, device: &str, capability: &str) -> bool {
        self.get_strlist_property(props::CAPABILITIES, device)
            .iter()
            .any(|c| c == capability)
    }
}

/// Performs the actual system calls for a volume.
///
/// `device` is the block device path of the volume (e.g. `/dev/sdb1`).
#[async_trait]
pub trait MountExecutor: Send + Sync {
    async fn mount(&self, device: &str) -> AppResult<()>;

    async fn unmount(&self, device: &str) -> AppResult<()>;

    async fn eject(&self, device: &str) -> AppResult<()>;
}
