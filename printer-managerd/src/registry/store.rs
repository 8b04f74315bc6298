use std::collections::HashMap;
use std::path::{Path, PathBuf};
use shared::types::Device;
use crate::registry::snapshot;

/// In-memory device map mirrored to a JSON snapshot file.
///
/// Not synchronized on its own: `RegistryHandle` owns it on a dedicated
/// thread, which serializes every mutation together with its file write.
pub struct Registry {
    path: PathBuf,
    devices: HashMap<String, Device>,
    /// Identities in insertion order
    order: Vec<String>,
}

impl Registry {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            devices: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Populate from the snapshot file. A missing file leaves the registry
    /// empty; an unreadable or malformed one is logged and ignored.
    /// Loaded devices are always marked offline.
    pub fn load(&mut self) -> usize {
        let devices = match snapshot::read_snapshot(&self.path) {
            Ok(Some(devices)) => devices,
            Ok(None) => {
                tracing::info!("No snapshot at {}, starting empty", self.path.display());
                return 0;
            }
            Err(e) => {
                tracing::error!("Failed to load snapshot, starting empty: {:#}", e);
                return 0;
            }
        };

        for mut device in devices {
            device.is_online = false;
            self.insert(device);
        }

        tracing::info!("Loaded {} devices from {}", self.devices.len(), self.path.display());
        self.devices.len()
    }

    pub fn get(&self, identity: &str) -> Option<&Device> {
        self.devices.get(identity)
    }

    pub fn list(&self) -> Vec<Device> {
        self.order
            .iter()
            .filter_map(|identity| self.devices.get(identity))
            .cloned()
            .collect()
    }

    /// Insert or replace a device, then rewrite the snapshot.
    /// Returns true if stable data changed. A failed write is logged and
    /// the in-memory update stands; the next upsert rewrites the file.
    pub fn upsert(&mut self, device: Device) -> bool {
        let changed = match self.devices.get(&device.identity()) {
            Some(old) => device_data_changed(old, &device),
            None => true,
        };

        self.insert(device);

        if let Err(e) = snapshot::write_snapshot(&self.path, &self.list()) {
            tracing::error!("Failed to persist registry: {:#}", e);
        } else {
            tracing::debug!("Saved {} devices to {}", self.devices.len(), self.path.display());
        }

        changed
    }

    fn insert(&mut self, device: Device) {
        let identity = device.identity();
        if !self.devices.contains_key(&identity) {
            self.order.push(identity.clone());
        }
        self.devices.insert(identity, device);
    }
}

/// Compare the fields that matter to clients; timestamps and temperatures
/// churn on every poll and are left out.
fn device_data_changed(old: &Device, new: &Device) -> bool {
    old.ipv4_address != new.ipv4_address
        || old.ipv6_address != new.ipv6_address
        || old.firmware_version != new.firmware_version
        || old.firmware_version_from_api != new.firmware_version_from_api
        || old.machine_type != new.machine_type
        || old.machine_type_name != new.machine_type_name
        || old.serial_number != new.serial_number
        || old.is_online != new.is_online
        || old.status != new.status
}
