//! Block device monitor built on `lsblk`
//!
//! Keeps a cached snapshot of `lsblk --json` output. Property queries are
//! answered from the cache; a polling task refreshes it and turns the
//! differences between two snapshots into [`HardwareSignal`]s.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{props, HardwareEventSource, HardwareSignal};
use crate::errors::{AppError, AppResult, ErrorContextExt};

const LSBLK_COLUMNS: &str = "NAME,PATH,LABEL,MOUNTPOINT,FSTYPE,TYPE,SIZE";

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    size: Option<serde_json::Value>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

/// One block device as seen in a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub path: String,
    pub label: String,
    pub mount_point: String,
    pub capabilities: Vec<String>,
    pub has_audio: bool,
    pub has_data: bool,
    pub is_video_dvd: bool,
}

impl BlockEntry {
    /// Whether `other` describes different media in the same slot
    fn media_changed(&self, other: &BlockEntry) -> bool {
        self.capabilities != other.capabilities
            || self.has_audio != other.has_audio
            || self.has_data != other.has_data
    }
}

/// Snapshot keyed by device identifier (the device path)
pub type Snapshot = BTreeMap<String, BlockEntry>;

fn size_of(value: &Option<serde_json::Value>) -> u64 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn collect(device: LsblkDevice, out: &mut Snapshot) {
    let path = device
        .path
        .clone()
        .unwrap_or_else(|| format!("/dev/{}", device.name));
    let kind = device.kind.clone().unwrap_or_default();
    let fstype = device.fstype.clone().filter(|f| !f.is_empty());
    let size = size_of(&device.size);

    let mut capabilities = vec!["block".to_string()];
    let mut has_audio = false;
    let has_data = fstype.is_some();
    let mount_point = device.mountpoint.unwrap_or_default();

    let is_volume = match kind.as_str() {
        "rom" => {
            // A disc without a filesystem but with content is an audio CD
            has_audio = fstype.is_none() && size > 0;
            size > 0
        }
        "part" | "crypt" | "lvm" => fstype.is_some(),
        "disk" => fstype.is_some() && device.children.is_empty(),
        _ => false,
    };
    // Only a mounted disc can be looked into
    let is_video_dvd = kind == "rom"
        && fstype.as_deref() == Some("udf")
        && !mount_point.is_empty()
        && Path::new(&mount_point).join("VIDEO_TS").is_dir();

    if is_volume {
        capabilities.push(props::CAP_VOLUME.to_string());
    } else {
        capabilities.push("storage".to_string());
    }

    out.insert(
        path.clone(),
        BlockEntry {
            path,
            label: device.label.unwrap_or_default(),
            mount_point,
            capabilities,
            has_audio,
            has_data,
            is_video_dvd,
        },
    );

    for child in device.children {
        collect(child, out);
    }
}

/// Parse `lsblk --json` output into a snapshot
pub fn parse_lsblk(json: &str) -> AppResult<Snapshot> {
    let output: LsblkOutput = serde_json::from_str(json)?;
    let mut snapshot = Snapshot::new();
    for device in output.blockdevices {
        collect(device, &mut snapshot);
    }
    Ok(snapshot)
}

/// Signals that turn `old` into `new`.
///
/// Media changing under a device path that stays put (a disc put into a
/// drive, a partition whose filesystem shows up late) is reported as the
/// old device leaving and a new one arriving.
pub fn diff_snapshots(old: &Snapshot, new: &Snapshot) -> Vec<HardwareSignal> {
    let mut signals = Vec::new();

    for udi in old.keys().filter(|udi| !new.contains_key(*udi)) {
        signals.push(HardwareSignal::DeviceRemoved(udi.clone()));
    }

    for (udi, entry) in new {
        match old.get(udi) {
            None => signals.push(HardwareSignal::DeviceAdded(udi.clone())),
            Some(previous) if previous.media_changed(entry) => {
                signals.push(HardwareSignal::DeviceRemoved(udi.clone()));
                signals.push(HardwareSignal::DeviceAdded(udi.clone()));
            }
            Some(previous) => {
                if previous.label != entry.label {
                    signals.push(HardwareSignal::PropertyModified {
                        device: udi.clone(),
                        property: props::VOLUME_LABEL.to_string(),
                    });
                }
                if previous.mount_point != entry.mount_point {
                    signals.push(HardwareSignal::PropertyModified {
                        device: udi.clone(),
                        property: props::VOLUME_MOUNT_POINT.to_string(),
                    });
                }
            }
        }
    }

    signals
}

/// Hardware source answering queries from the latest `lsblk` snapshot
#[derive(Debug, Default)]
pub struct LsblkHardware {
    snapshot: RwLock<Snapshot>,
}

impl LsblkHardware {
    pub fn new() -> Self {
        Self::default()
    }

    async fn query() -> AppResult<Snapshot> {
        let output = Command::new("lsblk")
            .args(["--json", "--bytes", "--output", LSBLK_COLUMNS])
            .output()
            .await
            .with_context("spawning lsblk")?;

        if !output.status.success() {
            return Err(AppError::hardware(
                "*",
                format!("lsblk exited with {}", output.status),
            ));
        }

        parse_lsblk(&String::from_utf8_lossy(&output.stdout))
    }

    /// Replace the cached snapshot and return the signals describing the change
    pub fn apply(&self, new: Snapshot) -> Vec<HardwareSignal> {
        let mut guard = self.snapshot.write().unwrap_or_else(|p| p.into_inner());
        let signals = diff_snapshots(&guard, &new);
        *guard = new;
        signals
    }

    /// Load the initial snapshot without emitting signals
    pub async fn prime(&self) -> AppResult<usize> {
        let snapshot = Self::query().await?;
        let count = snapshot.len();
        self.apply(snapshot);
        Ok(count)
    }

    /// Poll `lsblk` every `interval` and forward changes to `signals`.
    ///
    /// The task ends when the receiving side of `signals` is dropped.
    pub fn spawn_monitor(
        self: Arc<Self>,
        interval: Duration,
        signals: flume::Sender<HardwareSignal>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Block device monitor started (interval {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let snapshot = match Self::query().await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!("Block device query failed: {}", e);
                        continue;
                    }
                };
                for signal in self.apply(snapshot) {
                    debug!("Hardware signal: {:?}", signal);
                    if signals.send_async(signal).await.is_err() {
                        info!("Block device monitor stopped");
                        return;
                    }
                }
            }
        })
    }

    fn with_entry<T>(&self, udi: &str, f: impl FnOnce(&BlockEntry) -> T) -> Option<T> {
        let guard = self.snapshot.read().unwrap_or_else(|p| p.into_inner());
        guard.get(udi).map(f)
    }
}

impl HardwareEventSource for LsblkHardware {
    fn find_devices_by_capability(&self, capability: &str) -> Vec<String> {
        let guard = self.snapshot.read().unwrap_or_else(|p| p.into_inner());
        guard
            .iter()
            .filter(|(_, entry)| entry.capabilities.iter().any(|c| c == capability))
            .map(|(udi, _)| udi.clone())
            .collect()
    }

    fn get_string_property(&self, property: &str, device: &str) -> Option<String> {
        self.with_entry(device, |entry| match property {
            props::BLOCK_DEVICE => Some(entry.path.clone()),
            props::VOLUME_LABEL => Some(entry.label.clone()),
            props::VOLUME_MOUNT_POINT => Some(entry.mount_point.clone()),
            _ => None,
        })
        .flatten()
    }

    fn get_boolean_property(&self, property: &str, device: &str) -> bool {
        self.with_entry(device, |entry| match property {
            props::VOLUME_IS_MOUNTED => !entry.mount_point.is_empty(),
            props::DISC_HAS_AUDIO => entry.has_audio,
            props::DISC_HAS_DATA => entry.has_data,
            props::DISC_IS_VIDEODVD => entry.is_video_dvd,
            _ => false,
        })
        .unwrap_or(false)
    }

    fn get_strlist_property(&self, property: &str, device: &str) -> Vec<String> {
        self.with_entry(device, |entry| match property {
            props::CAPABILITIES => entry.capabilities.clone(),
            _ => Vec::new(),
        })
        .unwrap_or_default()
    }

    fn property_exists(&self, property: &str, device: &str) -> bool {
        let known = matches!(
            property,
            props::CAPABILITIES
                | props::BLOCK_DEVICE
                | props::VOLUME_LABEL
                | props::VOLUME_MOUNT_POINT
                | props::VOLUME_IS_MOUNTED
                | props::DISC_HAS_AUDIO
                | props::DISC_HAS_DATA
                | props::DISC_IS_VIDEODVD
        );
        known && self.with_entry(device, |_| ()).is_some()
    }
}
