//! Virtual CDJ keep-alive announcements.
//!
//! Remote database servers only answer hosts that are visible players on the
//! network, so the process joins the network as a virtual CDJ by broadcasting
//! its own announce packet on a fixed interval.

use crate::error::{DiscoveryError, Result};
use crate::packet::announce_packet;
use parking_lot::Mutex;
use prolink_core::config::VirtualCdjConfig;
use prolink_core::constants::ANNOUNCE_PORT;
use prolink_core::types::{Device, DeviceType};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Periodically announces this process as a CDJ
pub struct VirtualCdj {
    device: Device,
    target: SocketAddr,
    interval: std::time::Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl VirtualCdj {
    /// Creates the announcer from its configuration
    pub fn new(config: &VirtualCdjConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| DiscoveryError::InvalidConfig(e.to_string()))?;

        let ip = config.ip.ok_or_else(|| {
            DiscoveryError::InvalidConfig("virtual CDJ requires an ip address".to_string())
        })?;

        let device = Device {
            id: config.device_id,
            device_type: DeviceType::Cdj,
            name: config.name.clone(),
            ip,
            mac_addr: config.mac_addr,
        };

        Ok(Self {
            device,
            target: SocketAddr::V4(SocketAddrV4::new(config.broadcast_addr, ANNOUNCE_PORT)),
            interval: config.announce_interval(),
            task: Mutex::new(None),
        })
    }

    /// The identity being announced
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Starts broadcasting on `socket`. The socket must have broadcast enabled.
    pub fn start(&self, socket: Arc<UdpSocket>) {
        let mut task = self.task.lock();
        if task.is_some() {
            debug!("Virtual CDJ already announcing");
            return;
        }

        let packet = announce_packet(&self.device);
        let target = self.target;
        let mut ticker = tokio::time::interval(self.interval);

        info!(
            device_id = self.device.id,
            name = %self.device.name,
            target = %target,
            "Starting virtual CDJ announcements"
        );

        *task = Some(tokio::spawn(async move {
            loop {
                ticker.tick().await;
                if let Err(e) = socket.send_to(&packet, target).await {
                    warn!(error = %e, target = %target, "Failed to send announce packet");
                }
            }
        }));
    }

    /// Stops broadcasting
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("Virtual CDJ announcements stopped");
        }
    }

    pub fn is_announcing(&self) -> bool {
        self.task.lock().is_some()
    }
}

impl Drop for VirtualCdj {
    fn drop(&mut self) {
        self.stop();
    }
}
