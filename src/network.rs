//! The assembled client stack.

use crate::error::{NetworkError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use prolink_core::config::ProlinkConfig;
use prolink_core::types::DeviceId;
use prolink_discovery::{bind_announce_socket, DeviceEvent, DeviceEventKind, DeviceManager, VirtualCdj};
use prolink_nfs::{FetchFileOptions, FileFetchService};
use prolink_remotedb::{Connection, RemoteDatabase};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Discovery, file fetching and remote database access sharing one view of
/// the devices on the network.
///
/// Device loss drops every cached NFS client, root handle and database
/// connection held for that device.
pub struct ProlinkNetwork {
    config: ProlinkConfig,
    devices: Arc<DeviceManager>,
    virtual_cdj: Option<VirtualCdj>,
    files: Arc<FileFetchService>,
    database: Arc<RemoteDatabase>,
    invalidation: Mutex<Option<JoinHandle<()>>>,
}

impl ProlinkNetwork {
    pub fn new(mut config: ProlinkConfig) -> Result<Self> {
        config.validate()?;

        let virtual_cdj = if config.discovery.virtual_cdj.enabled {
            // The database only answers queries from a visible player
            config.remotedb.host_device_id = config.discovery.virtual_cdj.device_id;
            Some(VirtualCdj::new(&config.discovery.virtual_cdj)?)
        } else {
            None
        };

        let devices = Arc::new(DeviceManager::new(&config.discovery)?);
        let files = Arc::new(FileFetchService::new(&config.nfs));
        let database = Arc::new(RemoteDatabase::new(devices.clone(), config.remotedb.clone()));

        Ok(Self {
            config,
            devices,
            virtual_cdj,
            files,
            database,
            invalidation: Mutex::new(None),
        })
    }

    /// Binds the announce socket and joins the network
    pub async fn connect(&self) -> Result<()> {
        let socket = Arc::new(bind_announce_socket(&self.config.discovery)?);
        self.start(socket)
    }

    /// Joins the network through an already bound socket.
    ///
    /// The socket receives announcements and, when the virtual CDJ is
    /// enabled, carries its keep-alives.
    pub fn start(&self, socket: Arc<UdpSocket>) -> Result<()> {
        let mut invalidation = self.invalidation.lock();
        if invalidation.is_some() {
            return Err(NetworkError::AlreadyConnected);
        }

        // Subscribe before listening so no disconnect is missed
        let events = self.devices.subscribe();
        self.devices.start(socket.clone())?;

        if let Some(vcdj) = &self.virtual_cdj {
            vcdj.start(socket);
        }

        *invalidation = Some(tokio::spawn(invalidate_on_disconnect(
            events,
            self.files.clone(),
            self.database.clone(),
        )));

        info!(
            virtual_cdj = self.virtual_cdj.is_some(),
            device_timeout_ms = self.config.discovery.device_timeout_ms,
            "Joined Pro DJ Link network"
        );
        Ok(())
    }

    /// Leaves the network. Cached state is kept until the network is dropped.
    pub fn disconnect(&self) {
        if let Some(vcdj) = &self.virtual_cdj {
            vcdj.stop();
        }
        self.devices.stop();
        if let Some(task) = self.invalidation.lock().take() {
            task.abort();
            info!("Left Pro DJ Link network");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.invalidation.lock().is_some()
    }

    pub fn config(&self) -> &ProlinkConfig {
        &self.config
    }

    pub fn devices(&self) -> &Arc<DeviceManager> {
        &self.devices
    }

    pub fn files(&self) -> &Arc<FileFetchService> {
        &self.files
    }

    pub fn database(&self) -> &Arc<RemoteDatabase> {
        &self.database
    }

    pub fn virtual_cdj(&self) -> Option<&VirtualCdj> {
        self.virtual_cdj.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.devices.subscribe()
    }

    /// Reads a file from a player's media slot
    pub async fn fetch_file(&self, options: FetchFileOptions) -> Result<Bytes> {
        Ok(self.files.fetch_file(options).await?)
    }

    /// Database connection to a device, `None` if it never shows up
    pub async fn remote_database(&self, device_id: DeviceId) -> Result<Option<Arc<Connection>>> {
        Ok(self.database.get(device_id).await?)
    }
}

impl Drop for ProlinkNetwork {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn invalidate_on_disconnect(
    mut events: broadcast::Receiver<DeviceEvent>,
    files: Arc<FileFetchService>,
    database: Arc<RemoteDatabase>,
) {
    loop {
        match events.recv().await {
            Ok(event) if event.kind == DeviceEventKind::Disconnected => {
                debug!(device_id = event.device.id, "Dropping cached state of lost device");
                files.reset_device_cache(&event.device);
                database.disconnect(event.device.id);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Device event receiver lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
