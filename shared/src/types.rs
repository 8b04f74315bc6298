use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use crate::identity::device_identity;

/// A "printer discovered" notification as published by the discovery source.
/// An empty string is the "no value" representation for every text field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryEvent {
    pub name: String,
    pub firmware_version: String,
    pub machine_type: String,
    pub ipv4_address: String,
    pub ipv6_address: String,
    pub port: u16,
}

impl DiscoveryEvent {
    /// Identity key, or None when name or port is missing
    pub fn identity(&self) -> Option<String> {
        if self.name.is_empty() || self.port == 0 {
            return None;
        }
        Some(device_identity(self.port, &self.name))
    }

    pub fn ipv4(&self) -> Option<&str> {
        non_empty(&self.ipv4_address)
    }

    pub fn ipv6(&self) -> Option<&str> {
        non_empty(&self.ipv6_address)
    }
}

/// A printer tracked by the registry.
/// This is also the record layout of the on-disk snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Device {
    pub serial_number: String,

    pub name: String,

    /// Firmware version as announced over mDNS
    pub firmware_version: String,

    /// Firmware version as reported by the printer API
    pub firmware_version_from_api: String,

    #[serde(deserialize_with = "empty_as_none")]
    pub ipv4_address: Option<String>,

    #[serde(deserialize_with = "empty_as_none")]
    pub ipv6_address: Option<String>,

    pub port: u16,

    /// Machine type code, e.g. "9066"
    pub machine_type: String,

    /// Human readable machine variant, e.g. "Ultimaker S5"
    pub machine_type_name: String,

    pub is_online: bool,

    pub last_seen: Option<DateTime<Utc>>,

    pub bed_temperature: f64,
    pub head1_temperature: f64,
    pub head2_temperature: Option<f64>,
    pub status: String,
    pub print_progress: f64,
}

impl Device {
    /// Seed a new, not yet reachable device from an announcement
    pub fn from_event(event: &DiscoveryEvent) -> Self {
        Self {
            name: event.name.clone(),
            firmware_version: event.firmware_version.clone(),
            machine_type: event.machine_type.clone(),
            port: event.port,
            ..Default::default()
        }
    }

    pub fn identity(&self) -> String {
        device_identity(self.port, &self.name)
    }

    /// Address used to reach the device. IPv4 wins when both are known.
    pub fn address(&self) -> Option<&str> {
        self.ipv4_address
            .as_deref()
            .or(self.ipv6_address.as_deref())
    }

    /// Merge a successful probe: fresh telemetry, online, seen now.
    /// Print progress is only replaced when the probe read it.
    pub fn apply_telemetry(&mut self, telemetry: Telemetry, now: DateTime<Utc>) {
        self.firmware_version_from_api = telemetry.firmware_version;
        self.machine_type_name = telemetry.machine_type_name;
        self.serial_number = telemetry.serial_number;
        self.status = telemetry.status;
        if let Some(progress) = telemetry.print_progress {
            self.print_progress = progress;
        }
        self.bed_temperature = telemetry.bed_temperature;
        self.head1_temperature = telemetry.head1_temperature;
        self.head2_temperature = telemetry.head2_temperature;
        self.is_online = true;
        self.last_seen = Some(now);
    }
}

/// Everything a single successful status probe reads from a printer
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub firmware_version: String,
    pub machine_type_name: String,
    pub serial_number: String,
    pub status: String,
    /// Only read while a print job is active
    pub print_progress: Option<f64>,
    pub bed_temperature: f64,
    pub head1_temperature: f64,
    pub head2_temperature: Option<f64>,
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}
