use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::Device;

/// Hash only stable fields: last_seen and temperatures change on every
/// poll but don't represent a change clients need to react to.
#[derive(Serialize)]
struct HashView<'a> {
    identity: String,
    ipv4_address: Option<&'a str>,
    ipv6_address: Option<&'a str>,
    firmware_version: &'a str,
    firmware_version_from_api: &'a str,
    machine_type: &'a str,
    machine_type_name: &'a str,
    serial_number: &'a str,
    is_online: bool,
    status: &'a str,
}

/// Computes a SHA-256 hash of the device list.
/// Devices are sorted by identity for deterministic output.
pub fn compute_hash(devices: &[Device]) -> String {
    let mut views: Vec<HashView<'_>> = devices
        .iter()
        .map(|d| HashView {
            identity: d.identity(),
            ipv4_address: d.ipv4_address.as_deref(),
            ipv6_address: d.ipv6_address.as_deref(),
            firmware_version: &d.firmware_version,
            firmware_version_from_api: &d.firmware_version_from_api,
            machine_type: &d.machine_type,
            machine_type_name: &d.machine_type_name,
            serial_number: &d.serial_number,
            is_online: d.is_online,
            status: &d.status,
        })
        .collect();
    views.sort_by(|a, b| a.identity.cmp(&b.identity));

    let json = serde_json::to_string(&views)
        .expect("Failed to serialize devices for hashing");

    let hash = Sha256::digest(json.as_bytes());
    hex::encode(hash)
}
