use std::time::Duration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use shared::protocol::{DEVICE_API_PREFIX, STATUS_PRINTING};
use shared::types::{Device, Telemetry};
use crate::status::document::{PrinterDocument, ProgressDocument};
use crate::status::{DeviceProbe, ProbeError};

const FIRMWARE_PATH: &str = "/system/firmware/stable";
const VARIANT_PATH: &str = "/system/variant";
const GUID_PATH: &str = "/system/guid";
const STATUS_PATH: &str = "/printer/status";
const PROGRESS_PATH: &str = "/print_job/progress";
const PRINTER_PATH: &str = "/printer";

/// HTTP status client for the printer API
pub struct StatusClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl StatusClient {
    /// `timeout` bounds a whole probe, not a single request
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { http, timeout })
    }

    /// Run every probe step in order, bailing on the first failure
    pub async fn fetch(&self, device: &Device) -> Result<Telemetry, ProbeError> {
        let base = base_url(device).ok_or(ProbeError::NoAddress)?;

        let firmware_version = self.fetch_string(&base, FIRMWARE_PATH).await?;
        let machine_type_name = self.fetch_string(&base, VARIANT_PATH).await?;
        let serial_number = self.fetch_string(&base, GUID_PATH).await?;
        let status = self.fetch_string(&base, STATUS_PATH).await?;

        let print_progress = if status == STATUS_PRINTING {
            let doc: ProgressDocument = self.fetch_json(&base, PROGRESS_PATH).await?;
            Some(doc.progress)
        } else {
            None
        };

        let doc: PrinterDocument = self.fetch_json(&base, PRINTER_PATH).await?;
        let head = doc.heads.first().ok_or(ProbeError::MissingField("heads[0]"))?;
        let head1_temperature = head
            .extruders
            .first()
            .ok_or(ProbeError::MissingField("heads[0].extruders[0]"))?
            .hotend
            .temperature
            .current;
        let head2_temperature = head
            .extruders
            .get(1)
            .map(|extruder| extruder.hotend.temperature.current);

        Ok(Telemetry {
            firmware_version,
            machine_type_name,
            serial_number,
            status,
            print_progress,
            bed_temperature: doc.bed.temperature.current,
            head1_temperature,
            head2_temperature,
        })
    }

    async fn fetch_body(&self, base: &str, step: &'static str) -> Result<String, ProbeError> {
        let response = self
            .http
            .get(format!("{}{}", base, step))
            .send()
            .await
            .map_err(|source| ProbeError::Transport { step, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status { step, status });
        }

        response
            .text()
            .await
            .map_err(|source| ProbeError::Transport { step, source })
    }

    /// Endpoints answering with a JSON string literal
    async fn fetch_string(&self, base: &str, step: &'static str) -> Result<String, ProbeError> {
        let body = self.fetch_body(base, step).await?;
        let value = body.trim().replace('"', "");
        if value.is_empty() {
            return Err(ProbeError::Empty { step });
        }
        Ok(value)
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        base: &str,
        step: &'static str,
    ) -> Result<T, ProbeError> {
        let body = self.fetch_body(base, step).await?;
        serde_json::from_str(&body).map_err(|source| ProbeError::Decode { step, source })
    }
}

#[async_trait]
impl DeviceProbe for StatusClient {
    async fn probe(&self, device: &Device, cancel: &CancellationToken) -> Option<Telemetry> {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ProbeError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.fetch(device)) => {
                result.unwrap_or(Err(ProbeError::Timeout(self.timeout)))
            }
        };

        match outcome {
            Ok(telemetry) => {
                tracing::debug!(
                    identity = %device.identity(),
                    status = %telemetry.status,
                    "Probed device"
                );
                Some(telemetry)
            }
            Err(e) => {
                tracing::debug!(
                    identity = %device.identity(),
                    address = device.address().unwrap_or("-"),
                    "Device not reachable: {}",
                    e
                );
                None
            }
        }
    }
}

/// `http://{address}:{port}/api/v1`, with IPv6 literals bracketed
fn base_url(device: &Device) -> Option<String> {
    let address = device.address()?;
    let host = if address.contains(':') && !address.starts_with('[') {
        format!("[{}]", address)
    } else {
        address.to_string()
    };
    Some(format!("http://{}:{}{}", host, device.port, DEVICE_API_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
    use serde_json::{json, Value};

    /// Behaviour of the fake printer
    #[derive(Clone, Default)]
    struct FakePrinter {
        status: &'static str,
        fail_firmware: bool,
        single_extruder: bool,
        slow: bool,
    }

    async fn firmware(State(p): State<Arc<FakePrinter>>) -> Result<String, StatusCode> {
        if p.fail_firmware {
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
        if p.slow {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok("\"7.2.0\"".to_string())
    }

    async fn printer(State(p): State<Arc<FakePrinter>>) -> Json<Value> {
        let mut extruders = vec![json!({"hotend": {"temperature": {"current": 210.5, "target": 210.0}}})];
        if !p.single_extruder {
            extruders.push(json!({"hotend": {"temperature": {"current": 25.25, "target": 0.0}}}));
        }
        Json(json!({
            "bed": {"temperature": {"current": 60.125, "target": 60.0}},
            "heads": [{"extruders": extruders}]
        }))
    }

    async fn spawn_printer(fake: FakePrinter) -> Device {
        let app = Router::new()
            .route("/api/v1/system/firmware/stable", get(firmware))
            .route("/api/v1/system/variant", get(|| async { "\"Ultimaker S5\"" }))
            .route("/api/v1/system/guid", get(|| async { "\"5e1f-0c2a\"" }))
            .route(
                "/api/v1/printer/status",
                get(|State(p): State<Arc<FakePrinter>>| async move { format!("\"{}\"", p.status) }),
            )
            .route(
                "/api/v1/print_job/progress",
                get(|| async { Json(json!({"progress": 37.5})) }),
            )
            .route("/api/v1/printer", get(printer))
            .with_state(Arc::new(fake));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Device {
            name: "Printer1".to_string(),
            port,
            ipv4_address: Some("127.0.0.1".to_string()),
            ..Default::default()
        }
    }

    fn client() -> StatusClient {
        StatusClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_probe_idle_printer() {
        let device = spawn_printer(FakePrinter { status: "idle", ..Default::default() }).await;

        let telemetry = client().probe(&device, &CancellationToken::new()).await.unwrap();

        assert_eq!(telemetry.firmware_version, "7.2.0");
        assert_eq!(telemetry.machine_type_name, "Ultimaker S5");
        assert_eq!(telemetry.serial_number, "5e1f-0c2a");
        assert_eq!(telemetry.status, "idle");
        assert_eq!(telemetry.print_progress, None);
        assert_eq!(telemetry.bed_temperature, 60.125);
        assert_eq!(telemetry.head1_temperature, 210.5);
        assert_eq!(telemetry.head2_temperature, Some(25.25));
    }

    #[tokio::test]
    async fn test_probe_reads_progress_while_printing() {
        let device = spawn_printer(FakePrinter { status: "printing", ..Default::default() }).await;

        let telemetry = client().probe(&device, &CancellationToken::new()).await.unwrap();

        assert_eq!(telemetry.print_progress, Some(37.5));
    }

    #[tokio::test]
    async fn test_single_extruder_has_no_second_head() {
        let device = spawn_printer(FakePrinter {
            status: "idle",
            single_extruder: true,
            ..Default::default()
        })
        .await;

        let telemetry = client().probe(&device, &CancellationToken::new()).await.unwrap();

        assert_eq!(telemetry.head2_temperature, None);
    }

    #[tokio::test]
    async fn test_failed_step_is_unreachable() {
        let device = spawn_printer(FakePrinter {
            status: "idle",
            fail_firmware: true,
            ..Default::default()
        })
        .await;

        let result = client().fetch(&device).await;
        assert!(matches!(result, Err(ProbeError::Status { step: FIRMWARE_PATH, .. })));
        assert!(client().probe(&device, &CancellationToken::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_deadline_bounds_probe() {
        let device = spawn_printer(FakePrinter { status: "idle", slow: true, ..Default::default() }).await;
        let client = StatusClient::new(Duration::from_millis(200)).unwrap();

        let started = std::time::Instant::now();
        assert!(client.probe(&device, &CancellationToken::new()).await.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancel_stops_probe() {
        let device = spawn_printer(FakePrinter { status: "idle", slow: true, ..Default::default() }).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        assert!(client().probe(&device, &cancel).await.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_no_address_is_unreachable() {
        let device = Device {
            name: "Printer1".to_string(),
            port: 80,
            ..Default::default()
        };
        assert!(matches!(client().fetch(&device).await, Err(ProbeError::NoAddress)));
    }

    #[test]
    fn test_base_url_brackets_ipv6() {
        let mut device = Device {
            port: 80,
            ipv6_address: Some("fe80::1".to_string()),
            ..Default::default()
        };
        assert_eq!(base_url(&device).as_deref(), Some("http://[fe80::1]:80/api/v1"));

        device.ipv6_address = Some("[fe80::1]".to_string());
        assert_eq!(base_url(&device).as_deref(), Some("http://[fe80::1]:80/api/v1"));

        device.ipv4_address = Some("10.0.0.5".to_string());
        assert_eq!(base_url(&device).as_deref(), Some("http://10.0.0.5:80/api/v1"));
    }
}
