use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use anyhow::{Context, Result};
use shared::protocol::{TXT_FIRMWARE_VERSION, TXT_MACHINE, TXT_NAME};
use shared::types::DiscoveryEvent;

/// Printers currently resolved on the network, keyed by mDNS fullname.
///
/// mdns-sd only reports a service when it first resolves or its records
/// change, so the browser replays this set on a timer. That replay is what
/// gets a printer the sweep marked offline probed again.
#[derive(Default)]
pub struct ResolvedPrinters {
    events: HashMap<String, DiscoveryEvent>,
}

impl ResolvedPrinters {
    pub fn resolved(&mut self, fullname: &str, event: DiscoveryEvent) {
        self.events.insert(fullname.to_string(), event);
    }

    pub fn removed(&mut self, fullname: &str) {
        self.events.remove(fullname);
    }

    /// Snapshot to re-announce, ordered by fullname
    pub fn events(&self) -> Vec<DiscoveryEvent> {
        let mut names: Vec<&String> = self.events.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.events.get(name))
            .cloned()
            .collect()
    }
}

/// Browse for printers and publish each resolved announcement as a
/// `DiscoveryEvent`. Every `reannounce` period all printers still resolved
/// are published again. Runs until cancelled or the consumer goes away.
pub async fn run_browser(
    daemon: ServiceDaemon,
    service_type: String,
    reannounce: Duration,
    tx: mpsc::Sender<DiscoveryEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    tracing::info!("Starting mDNS browser for {}", service_type);

    let receiver = daemon
        .browse(&service_type)
        .with_context(|| format!("Failed to browse {}", service_type))?;

    let mut printers = ResolvedPrinters::default();
    let mut reannounce_interval = tokio::time::interval(reannounce);
    reannounce_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    reannounce_interval.tick().await;

    'browse: loop {
        tokio::select! {
            event = receiver.recv_async() => {
                match event {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        let event = convert_service_info(&info);
                        tracing::debug!(
                            "Resolved printer {} at {}:{}",
                            event.name,
                            if event.ipv4_address.is_empty() { &event.ipv6_address } else { &event.ipv4_address },
                            event.port
                        );
                        printers.resolved(info.get_fullname(), event.clone());
                        if tx.send(event).await.is_err() {
                            tracing::warn!("Discovery consumer gone, stopping browser");
                            break;
                        }
                    }
                    Ok(ServiceEvent::ServiceRemoved(_, fullname)) => {
                        // Removal does not delete devices; it only stops re-announcing
                        tracing::debug!("Service removed: {}", fullname);
                        printers.removed(&fullname);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("mDNS browse channel closed: {}", e);
                        break;
                    }
                }
            }

            _ = reannounce_interval.tick() => {
                let events = printers.events();
                tracing::debug!("Re-announcing {} printers", events.len());
                for event in events {
                    if tx.send(event).await.is_err() {
                        tracing::warn!("Discovery consumer gone, stopping browser");
                        break 'browse;
                    }
                }
            }

            _ = cancel.cancelled() => {
                tracing::info!("mDNS browser shutting down");
                break;
            }
        }
    }

    if let Err(e) = daemon.stop_browse(&service_type) {
        tracing::debug!("Failed to stop browsing {}: {}", service_type, e);
    }

    Ok(())
}

/// Convert an mdns-sd ServiceInfo to a DiscoveryEvent
fn convert_service_info(info: &ServiceInfo) -> DiscoveryEvent {
    let name = info
        .get_property_val_str(TXT_NAME)
        .map(str::to_string)
        .unwrap_or_else(|| instance_label(info.get_fullname(), info.get_type()));

    event_from_parts(
        name,
        info.get_property_val_str(TXT_FIRMWARE_VERSION).unwrap_or_default(),
        info.get_property_val_str(TXT_MACHINE).unwrap_or_default(),
        info.get_addresses().iter().copied(),
        info.get_port(),
    )
}

/// Pick the first address of each family, lowest first for stable output
fn event_from_parts(
    name: String,
    firmware_version: &str,
    machine_type: &str,
    addresses: impl Iterator<Item = IpAddr>,
    port: u16,
) -> DiscoveryEvent {
    let mut addresses: Vec<IpAddr> = addresses.collect();
    addresses.sort();

    let ipv4_address = addresses
        .iter()
        .find(|addr| addr.is_ipv4())
        .map(ToString::to_string)
        .unwrap_or_default();
    let ipv6_address = addresses
        .iter()
        .find(|addr| addr.is_ipv6())
        .map(ToString::to_string)
        .unwrap_or_default();

    DiscoveryEvent {
        name,
        firmware_version: firmware_version.to_string(),
        machine_type: machine_type.to_string(),
        ipv4_address,
        ipv6_address,
        port,
    }
}

/// "ultimakersystem-ccbdd3009a5a._ultimaker._tcp.local." -> "ultimakersystem-ccbdd3009a5a"
fn instance_label(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .map(|label| label.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_instance_label() {
        assert_eq!(
            instance_label("um-s5._ultimaker._tcp.local.", "_ultimaker._tcp.local."),
            "um-s5"
        );
        assert_eq!(instance_label("odd-name", "_ultimaker._tcp.local."), "odd-name");
    }

    #[test]
    fn test_event_picks_one_address_per_family() {
        let addresses = vec![
            IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
        ];
        let event = event_from_parts("Printer1".to_string(), "7.2.0", "9066", addresses.into_iter(), 80);

        assert_eq!(event.ipv4_address, "10.0.0.5");
        assert_eq!(event.ipv6_address, "fe80::1");
        assert_eq!(event.identity().as_deref(), Some("80:Printer1"));
        assert_eq!(event.machine_type, "9066");
    }

    #[test]
    fn test_resolved_printers_are_replayed_until_removed() {
        let mut printers = ResolvedPrinters::default();
        let a = event_from_parts(
            "A".to_string(), "7.2.0", "9066",
            vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))].into_iter(), 80,
        );
        let b = event_from_parts(
            "B".to_string(), "7.2.0", "9066",
            vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))].into_iter(), 80,
        );

        printers.resolved("a._ultimaker._tcp.local.", a.clone());
        printers.resolved("b._ultimaker._tcp.local.", b.clone());
        assert_eq!(printers.events(), vec![a.clone(), b.clone()]);

        // Same printer resolving again at a new address replaces the old entry
        let moved = event_from_parts(
            "A".to_string(), "7.2.0", "9066",
            vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))].into_iter(), 80,
        );
        printers.resolved("a._ultimaker._tcp.local.", moved.clone());
        assert_eq!(printers.events(), vec![moved, b.clone()]);

        printers.removed("a._ultimaker._tcp.local.");
        assert_eq!(printers.events(), vec![b]);
    }

    #[test]
    fn test_event_without_ipv6() {
        let addresses = vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100))];
        let event = event_from_parts("P".to_string(), "", "", addresses.into_iter(), 80);

        assert_eq!(event.ipv6(), None);
        assert_eq!(event.firmware_version, "");
    }
}
