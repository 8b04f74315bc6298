//! Remote status probing of a single printer.
//!
//! A probe either yields a complete `Telemetry` or nothing: every failure
//! along the way (HTTP error, timeout, bad payload, cancellation) means
//! "unreachable for this cycle".

use std::time::Duration;
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use shared::types::{Device, Telemetry};

pub mod client;
pub mod document;

pub use client::StatusClient;

/// Reads the current state of one device.
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    /// Probe `device`, stopping early if `cancel` fires.
    /// Returns None when the device is unreachable.
    async fn probe(&self, device: &Device, cancel: &CancellationToken) -> Option<Telemetry>;
}

/// Why a probe gave up. Only ever logged.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("device has no address")]
    NoAddress,

    #[error("{step}: HTTP {status}")]
    Status {
        step: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("{step}: {source}")]
    Transport {
        step: &'static str,
        source: reqwest::Error,
    },

    #[error("{step}: empty response")]
    Empty { step: &'static str },

    #[error("{step}: invalid JSON: {source}")]
    Decode {
        step: &'static str,
        source: serde_json::Error,
    },

    #[error("{0} missing from printer document")]
    MissingField(&'static str),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}
