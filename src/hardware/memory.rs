//! In-memory hardware layer
//!
//! A property table plus an executor that records calls. Used by the test
//! suites and for running the daemon without real devices.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{props, HardwareEventSource, MountExecutor};
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq)]
enum PropValue {
    Str(String),
    Bool(bool),
    List(Vec<String>),
}

/// Property builder for a device stored in [`MemoryHardware`]
#[derive(Debug, Clone, Default)]
pub struct MemoryDevice {
    props: BTreeMap<String, PropValue>,
}

impl MemoryDevice {
    /// A mountable volume backed by `device_path`
    pub fn volume(device_path: &str) -> Self {
        Self::default()
            .strlist(props::CAPABILITIES, &["block", props::CAP_VOLUME])
            .string(props::BLOCK_DEVICE, device_path)
            .boolean(props::VOLUME_IS_MOUNTED, false)
    }

    pub fn label(self, label: &str) -> Self {
        self.string(props::VOLUME_LABEL, label)
    }

    pub fn mounted_at(self, mount_point: &str) -> Self {
        self.string(props::VOLUME_MOUNT_POINT, mount_point)
            .boolean(props::VOLUME_IS_MOUNTED, true)
    }

    pub fn audio_disc(self) -> Self {
        self.boolean(props::DISC_HAS_AUDIO, true)
            .boolean(props::DISC_HAS_DATA, false)
    }

    pub fn mixed_disc(self) -> Self {
        self.boolean(props::DISC_HAS_AUDIO, true)
            .boolean(props::DISC_HAS_DATA, true)
    }

    pub fn video_disc(self) -> Self {
        self.boolean(props::DISC_IS_VIDEODVD, true)
            .boolean(props::DISC_HAS_DATA, true)
    }

    pub fn string(mut self, key: &str, value: &str) -> Self {
        self.props.insert(key.to_string(), PropValue::Str(value.to_string()));
        self
    }

    pub fn boolean(mut self, key: &str, value: bool) -> Self {
        self.props.insert(key.to_string(), PropValue::Bool(value));
        self
    }

    pub fn strlist(mut self, key: &str, values: &[&str]) -> Self {
        self.props.insert(
            key.to_string(),
            PropValue::List(values.iter().map(|v| v.to_string()).collect()),
        );
        self
    }
}

/// Hardware property table keyed by device identifier
#[derive(Debug, Default)]
pub struct MemoryHardware {
    devices: Mutex<BTreeMap<String, MemoryDevice>>,
}

impl MemoryHardware {
    pub fn new() -> Self {
        Self::default()
    }

    fn devices(&self) -> MutexGuard<'_, BTreeMap<String, MemoryDevice>> {
        self.devices.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, udi: &str, device: MemoryDevice) {
        self.devices().insert(udi.to_string(), device);
    }

    pub fn remove(&self, udi: &str) {
        self.devices().remove(udi);
    }

    pub fn set_string(&self, udi: &str, key: &str, value: &str) {
        if let Some(device) = self.devices().get_mut(udi) {
            device.props.insert(key.to_string(), PropValue::Str(value.to_string()));
        }
    }

    pub fn set_boolean(&self, udi: &str, key: &str, value: bool) {
        if let Some(device) = self.devices().get_mut(udi) {
            device.props.insert(key.to_string(), PropValue::Bool(value));
        }
    }

    /// Simulate the kernel reporting a mount
    pub fn set_mounted(&self, udi: &str, mount_point: Option<&str>) {
        self.set_string(udi, props::VOLUME_MOUNT_POINT, mount_point.unwrap_or(""));
        self.set_boolean(udi, props::VOLUME_IS_MOUNTED, mount_point.is_some());
    }

    /// Find the device identifier whose `block.device` is `path`
    pub fn udi_for_path(&self, path: &str) -> Option<String> {
        self.devices().iter().find_map(|(udi, device)| {
            match device.props.get(props::BLOCK_DEVICE) {
                Some(PropValue::Str(p)) if p == path => Some(udi.clone()),
                _ => None,
            }
        })
    }

    fn prop(&self, property: &str, udi: &str) -> Option<PropValue> {
        self.devices()
            .get(udi)
            .and_then(|device| device.props.get(property).cloned())
    }
}

impl HardwareEventSource for MemoryHardware {
    fn find_devices_by_capability(&self, capability: &str) -> Vec<String> {
        self.devices()
            .iter()
            .filter(|(_, device)| {
                matches!(device.props.get(props::CAPABILITIES),
                    Some(PropValue::List(caps)) if caps.iter().any(|c| c == capability))
            })
            .map(|(udi, _)| udi.clone())
            .collect()
    }

    fn get_string_property(&self, property: &str, device: &str) -> Option<String> {
        match self.prop(property, device) {
            Some(PropValue::Str(value)) => Some(value),
            _ => None,
        }
    }

    fn get_boolean_property(&self, property: &str, device: &str) -> bool {
        matches!(self.prop(property, device), Some(PropValue::Bool(true)))
    }

    fn get_strlist_property(&self, property: &str, device: &str) -> Vec<String> {
        match self.prop(property, device) {
            Some(PropValue::List(values)) => values,
            _ => Vec::new(),
        }
    }

    fn property_exists(&self, property: &str, device: &str) -> bool {
        self.prop(property, device).is_some()
    }
}

/// Executor operation recorded by [`RecordingExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorCall {
    Mount(String),
    Unmount(String),
    Eject(String),
}

/// Mount executor that records every call and can be told to fail.
///
/// When attached to a [`MemoryHardware`], successful calls update the
/// property table the way the kernel would, so follow-up queries see the
/// new mount state.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<ExecutorCall>>,
    failing: Mutex<HashSet<String>>,
    failing_ejects: Mutex<HashSet<String>>,
    hardware: Option<Arc<MemoryHardware>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hardware(hardware: Arc<MemoryHardware>) -> Self {
        Self {
            hardware: Some(hardware),
            ..Self::default()
        }
    }

    /// Make every operation on `device` fail until [`RecordingExecutor::succeed`]
    pub fn fail(&self, device: &str) {
        self.failing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(device.to_string());
    }

    /// Make only ejecting `device` fail
    pub fn fail_eject(&self, device: &str) {
        self.failing_ejects
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(device.to_string());
    }

    pub fn succeed(&self, device: &str) {
        self.failing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(device);
        self.failing_ejects
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(device);
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn record(&self, call: ExecutorCall, operation: &str, device: &str) -> AppResult<()> {
        let is_eject = matches!(call, ExecutorCall::Eject(_));
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push(call);
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(device)
            || (is_eject
                && self
                    .failing_ejects
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .contains(device));
        if failing {
            return Err(AppError::mount_operation(device, operation, "simulated failure"));
        }
        Ok(())
    }

    fn udi(&self, device: &str) -> Option<(Arc<MemoryHardware>, String)> {
        let hardware = self.hardware.as_ref()?;
        let udi = hardware.udi_for_path(device)?;
        Some((Arc::clone(hardware), udi))
    }
}

#[async_trait]
impl MountExecutor for RecordingExecutor {
    async fn mount(&self, device: &str) -> AppResult<()> {
        self.record(ExecutorCall::Mount(device.to_string()), "mount", device)?;
        if let Some((hardware, udi)) = self.udi(device) {
            let name = device.rsplit('/').next().unwrap_or(device);
            hardware.set_mounted(&udi, Some(&format!("/media/{name}")));
        }
        Ok(())
    }

    async fn unmount(&self, device: &str) -> AppResult<()> {
        self.record(ExecutorCall::Unmount(device.to_string()), "unmount", device)?;
        if let Some((hardware, udi)) = self.udi(device) {
            hardware.set_mounted(&udi, None);
        }
        Ok(())
    }

    async fn eject(&self, device: &str) -> AppResult<()> {
        self.record(ExecutorCall::Eject(device.to_string()), "eject", device)?;
        if let Some((hardware, udi)) = self.udi(device) {
            hardware.remove(&udi);
        }
        Ok(())
    }
}
