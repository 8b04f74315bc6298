use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::watch;
use shared::protocol::API_PREFIX;
use shared::types::Device;
use crate::registry::RegistryHandle;

/// Read-only view of the registry
#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryHandle,
    pub hash_rx: watch::Receiver<String>,
}

#[derive(Deserialize)]
pub struct DeviceQuery {
    pub online: Option<bool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(&format!("{}/devices", API_PREFIX), get(get_devices))
        .route(&format!("{}/devices/hash", API_PREFIX), get(get_hash))
        .route(&format!("{}/devices/:identity", API_PREFIX), get(get_device))
        .with_state(state)
}

async fn get_devices(
    State(state): State<AppState>,
    Query(params): Query<DeviceQuery>,
) -> Result<Json<Vec<Device>>, StatusCode> {
    let devices = state.registry.list().await.map_err(|e| {
        tracing::error!("Failed to list devices: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let devices = match params.online {
        Some(online) => devices.into_iter().filter(|d| d.is_online == online).collect(),
        None => devices,
    };

    Ok(Json(devices))
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.hash_rx.borrow().clone()
}

async fn get_device(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<Device>, StatusCode> {
    state
        .registry
        .get(identity)
        .await
        .map_err(|e| {
            tracing::error!("Failed to query device: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{hash, Registry};

    async fn serve(devices: Vec<Device>) -> (String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (hash_tx, hash_rx) = watch::channel(hash::compute_hash(&[]));
        let registry = RegistryHandle::spawn(Registry::new(dir.path().join("printers.json")), hash_tx);
        for device in devices {
            registry.upsert(device).await.unwrap();
        }

        let app = router(AppState { registry, hash_rx });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), dir)
    }

    fn device(name: &str, online: bool) -> Device {
        Device {
            name: name.to_string(),
            port: 80,
            ipv4_address: Some("10.0.0.5".to_string()),
            is_online: online,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_list_and_filter() {
        let (base, _dir) = serve(vec![device("A", true), device("B", false)]).await;

        let all: Vec<Device> = reqwest::get(format!("{}/v1/devices", base))
            .await.unwrap().json().await.unwrap();
        assert_eq!(all.len(), 2);

        let online: Vec<Device> = reqwest::get(format!("{}/v1/devices?online=true", base))
            .await.unwrap().json().await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].name, "A");
    }

    #[tokio::test]
    async fn test_get_by_identity() {
        let (base, _dir) = serve(vec![device("A", true)]).await;

        let found = reqwest::get(format!("{}/v1/devices/80:A", base)).await.unwrap();
        assert_eq!(found.status(), reqwest::StatusCode::OK);
        let found: Device = found.json().await.unwrap();
        assert_eq!(found.identity(), "80:A");

        let missing = reqwest::get(format!("{}/v1/devices/80:Z", base)).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_hash_reflects_registry() {
        let (base, _dir) = serve(vec![device("A", true)]).await;

        let served = reqwest::get(format!("{}/v1/devices/hash", base))
            .await.unwrap().text().await.unwrap();
        assert_eq!(served, hash::compute_hash(&[device("A", true)]));
    }
}
