use std::thread;
use tokio::sync::{mpsc, oneshot, watch};
use anyhow::Result;
use shared::types::Device;
use crate::registry::{hash, Registry};

/// Commands sent to the registry thread
pub enum RegistryCommand {
    Upsert(Device, oneshot::Sender<bool>),
    Get(String, oneshot::Sender<Option<Device>>),
    List(oneshot::Sender<Vec<Device>>),
    Shutdown,
}

/// Handle to the registry thread.
///
/// The thread owns the `Registry` and runs one command at a time, so a map
/// mutation and its snapshot write are never interleaved with another.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Spawn the registry thread around an already loaded registry
    pub fn spawn(mut registry: Registry, hash_tx: watch::Sender<String>) -> Self {
        let (tx, mut rx) = mpsc::channel::<RegistryCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    RegistryCommand::Upsert(device, reply) => {
                        let changed = registry.upsert(device);
                        if changed {
                            let _ = hash_tx.send(hash::compute_hash(&registry.list()));
                        }
                        let _ = reply.send(changed);
                    }
                    RegistryCommand::Get(identity, reply) => {
                        let _ = reply.send(registry.get(&identity).cloned());
                    }
                    RegistryCommand::List(reply) => {
                        let _ = reply.send(registry.list());
                    }
                    RegistryCommand::Shutdown => {
                        tracing::info!("Registry thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Insert or replace a device and persist. Returns true if data changed.
    pub async fn upsert(&self, device: Device) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Upsert(device, reply)).await?;
        Ok(rx.await?)
    }

    /// Look up a device by identity
    pub async fn get(&self, identity: String) -> Result<Option<Device>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Get(identity, reply)).await?;
        Ok(rx.await?)
    }

    /// All devices in insertion order
    pub async fn list(&self) -> Result<Vec<Device>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::List(reply)).await?;
        Ok(rx.await?)
    }

    /// Shutdown the registry thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(RegistryCommand::Shutdown).await?;
        Ok(())
    }
}
