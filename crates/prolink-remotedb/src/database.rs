//! Per-device connection cache.

use crate::connection::Connection;
use crate::error::Result;
use dashmap::DashMap;
use prolink_core::config::RemoteDbConfig;
use prolink_core::types::DeviceId;
use prolink_discovery::DeviceManager;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

type ConnectionSlot = Arc<Mutex<Option<Arc<Connection>>>>;

/// Hands out remote database connections to discovered devices, opening
/// them lazily and replacing ones that became unusable.
pub struct RemoteDatabase {
    devices: Arc<DeviceManager>,
    config: RemoteDbConfig,
    connections: DashMap<DeviceId, ConnectionSlot>,
}

impl RemoteDatabase {
    pub fn new(devices: Arc<DeviceManager>, config: RemoteDbConfig) -> Self {
        Self {
            devices,
            config,
            connections: DashMap::new(),
        }
    }

    /// Returns a connection to the device, or `None` if the device does not
    /// show up on the network within the configured wait.
    pub async fn get(&self, device_id: DeviceId) -> Result<Option<Arc<Connection>>> {
        let Some(device) = self
            .devices
            .get_device_ensured(device_id, self.config.device_wait())
            .await
        else {
            debug!(device_id = device_id, "Device not on the network");
            return Ok(None);
        };

        let slot = self.connections.entry(device_id).or_default().clone();
        let mut cached = slot.lock().await;

        if let Some(conn) = cached.as_ref() {
            if !conn.is_desynced() && conn.device().ip == device.ip {
                return Ok(Some(conn.clone()));
            }
            info!(device_id = device_id, "Replacing unusable remote database connection");
            *cached = None;
        }

        let conn = Arc::new(Connection::connect(&device, &self.config).await?);
        *cached = Some(conn.clone());

        Ok(Some(conn))
    }

    /// Drops the cached connection for a device that left the network.
    pub fn disconnect(&self, device_id: DeviceId) {
        if self.connections.remove(&device_id).is_some() {
            info!(device_id = device_id, "Remote database connection dropped");
        }
    }

    /// True when a connection to the device is cached
    pub async fn is_connected(&self, device_id: DeviceId) -> bool {
        let Some(slot) = self.connections.get(&device_id).map(|e| e.value().clone()) else {
            return false;
        };
        let cached = slot.lock().await;
        cached.is_some()
    }

    pub fn config(&self) -> &RemoteDbConfig {
        &self.config
    }
}
