use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use shared::types::{Device, DiscoveryEvent};
use crate::registry::RegistryHandle;
use crate::status::DeviceProbe;

/// What became of one discovery event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Failed validation, dropped without touching the registry
    Rejected(&'static str),
    /// Valid, but no address to reach the device after merging
    Discarded,
    Added { online: bool },
    Updated { online: bool },
}

/// Per-sweep counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub examined: usize,
    pub online: usize,
    pub went_offline: usize,
    pub failed_writes: usize,
}

/// Sole writer to the registry. Merges discovery events and re-polls
/// reachable devices on a timer.
pub struct Reconciler {
    registry: RegistryHandle,
    probe: Arc<dyn DeviceProbe>,
}

impl Reconciler {
    pub fn new(registry: RegistryHandle, probe: Arc<dyn DeviceProbe>) -> Self {
        Self { registry, probe }
    }

    /// Validate, merge, probe once and commit a discovery event.
    pub async fn handle_event(
        &self,
        event: DiscoveryEvent,
        cancel: &CancellationToken,
    ) -> Result<EventOutcome> {
        if let Err(reason) = validate(&event) {
            tracing::warn!(name = %event.name, port = event.port, "Discarding discovery event: {}", reason);
            return Ok(EventOutcome::Rejected(reason));
        }

        let Some(identity) = event.identity() else {
            return Ok(EventOutcome::Rejected("missing port or name"));
        };
        let existing = self.registry.get(identity.clone()).await?;
        let is_new = existing.is_none();

        let mut device = merge_event(existing, &event);
        if device.address().is_none() {
            tracing::warn!(%identity, "Device has no address after merge, discarding");
            return Ok(EventOutcome::Discarded);
        }

        tracing::info!(
            %identity,
            machine_type = %device.machine_type,
            address = device.address().unwrap_or("-"),
            "Processing discovered printer"
        );

        match self.probe.probe(&device, cancel).await {
            Some(telemetry) => device.apply_telemetry(telemetry, Utc::now()),
            None => device.is_online = false,
        }
        let online = device.is_online;

        self.registry.upsert(device).await?;

        tracing::info!(
            %identity,
            "Printer {}: {}",
            if is_new { "added" } else { "updated" },
            if online { "online" } else { "offline" }
        );

        Ok(if is_new {
            EventOutcome::Added { online }
        } else {
            EventOutcome::Updated { online }
        })
    }

    /// Re-probe every reachable device once. Offline devices are left for
    /// the next discovery event. A failure on one device never stops the
    /// sweep; cancellation is checked before each device.
    ///
    /// The listing only fixes the iteration order. Each device is re-read
    /// right before its probe, and the outcome is applied to the latest
    /// stored copy, so events committed meanwhile are not reverted.
    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<SweepSummary> {
        let identities: Vec<String> = self
            .registry
            .list()
            .await?
            .iter()
            .map(Device::identity)
            .collect();
        let mut summary = SweepSummary::default();

        for identity in identities {
            if cancel.is_cancelled() {
                tracing::debug!("Sweep cancelled");
                break;
            }

            let device = match self.registry.get(identity.clone()).await? {
                Some(device) if device.is_online => device,
                _ => continue,
            };

            summary.examined += 1;
            let telemetry = self.probe.probe(&device, cancel).await;

            let mut latest = match self.registry.get(identity.clone()).await? {
                Some(latest) => latest,
                None => device.clone(),
            };
            if latest.address() != device.address() {
                // Rediscovered at a new address while probing; that event
                // already carries a fresher liveness check
                tracing::debug!(%identity, "Address changed during sweep, dropping result");
                continue;
            }

            match telemetry {
                Some(telemetry) => {
                    latest.apply_telemetry(telemetry, Utc::now());
                    summary.online += 1;
                }
                None => {
                    latest.is_online = false;
                    summary.went_offline += 1;
                    tracing::warn!(
                        %identity,
                        address = latest.address().unwrap_or("-"),
                        "Printer went offline"
                    );
                }
            }

            if let Err(e) = self.registry.upsert(latest).await {
                summary.failed_writes += 1;
                tracing::error!("Failed to store sweep result: {}", e);
            }
        }

        tracing::debug!(
            examined = summary.examined,
            online = summary.online,
            went_offline = summary.went_offline,
            "Sweep complete"
        );
        Ok(summary)
    }
}

/// Reject events that can't name or reach a device
pub fn validate(event: &DiscoveryEvent) -> Result<(), &'static str> {
    if event.ipv4().is_none() && event.ipv6().is_none() {
        return Err("missing IP address");
    }
    if event.port == 0 || event.name.is_empty() {
        return Err("missing port or name");
    }
    Ok(())
}

/// Fold an event into the stored device, or seed a new one.
///
/// Addresses and announced fields present in the event overwrite; empty
/// ones keep what was stored. Reachability and telemetry are untouched.
pub fn merge_event(existing: Option<Device>, event: &DiscoveryEvent) -> Device {
    let mut device = match existing {
        Some(device) => device,
        None => Device::from_event(event),
    };

    if let Some(ipv4) = event.ipv4() {
        device.ipv4_address = Some(ipv4.to_string());
    }
    if let Some(ipv6) = event.ipv6() {
        device.ipv6_address = Some(ipv6.to_string());
    }
    if !event.firmware_version.is_empty() {
        device.firmware_version = event.firmware_version.clone();
    }
    if !event.machine_type.is_empty() {
        device.machine_type = event.machine_type.clone();
    }

    device
}

/// Event consumption loop - bridges the discovery channel to the registry
pub async fn run_events(
    reconciler: Arc<Reconciler>,
    mut rx: mpsc::Receiver<DiscoveryEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Event loop shutting down");
                break;
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    tracing::info!("Discovery channel closed");
                    break;
                };
                match reconciler.handle_event(event, &cancel).await {
                    Ok(outcome) => tracing::debug!(?outcome, "Discovery event handled"),
                    Err(e) => tracing::error!("Failed to process discovery event: {}", e),
                }
            }
        }
    }

    Ok(())
}

/// Timer loop driving the periodic sweep
pub async fn run_sweeps(
    reconciler: Arc<Reconciler>,
    period: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate tick; the first sweep runs one period after start
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Sweep loop shutting down");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = reconciler.sweep(&cancel).await {
                    tracing::error!("Sweep failed: {}", e);
                }
            }
        }
    }

    Ok(())
}
