use std::collections::BTreeMap;

use super::{MountedVolume, Volume};

/// Device identifier -> Volume
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    volumes: BTreeMap<String, Volume>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a volume unless its identifier is already known.
    ///
    /// Returns false for duplicates; the existing entry is kept.
    pub fn insert(&mut self, volume: Volume) -> bool {
        if self.volumes.contains_key(volume.udi()) {
            return false;
        }
        self.volumes.insert(volume.udi().to_string(), volume);
        true
    }

    pub fn contains(&self, udi: &str) -> bool {
        self.volumes.contains_key(udi)
    }

    pub fn get(&self, udi: &str) -> Option<&Volume> {
        self.volumes.get(udi)
    }

    pub fn get_mut(&mut self, udi: &str) -> Option<&mut Volume> {
        self.volumes.get_mut(udi)
    }

    pub fn remove(&mut self, udi: &str) -> Option<Volume> {
        self.volumes.remove(udi)
    }

    /// Find a volume by identifier, falling back to its block device path
    pub fn resolve(&self, device: &str) -> Option<&Volume> {
        self.volumes.get(device).or_else(|| {
            self.volumes
                .values()
                .find(|volume| volume.device_path() == device)
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Volume> {
        self.volumes.values_mut()
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn mounted(&self) -> BTreeMap<String, MountedVolume> {
        self.volumes
            .values()
            .filter(|volume| volume.is_mounted())
            .map(|volume| (volume.udi().to_string(), volume.mounted_entry()))
            .collect()
    }
}
