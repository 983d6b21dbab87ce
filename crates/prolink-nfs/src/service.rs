//! File fetching from player media slots.
//!
//! [`FileFetchService`] owns two caches:
//! - one RPC transport plus bound mount and NFS programs per device address
//! - one mounted root handle per (device address, media slot)
//!
//! Both are filled lazily behind per-key async locks so concurrent fetches
//! for the same device never connect or mount twice. Neither cache can tell
//! when a device leaves the network; call [`FileFetchService::reset_device_cache`]
//! when discovery reports the device disconnected.

use crate::error::{NfsError, Result};
use crate::programs::{
    fetch_file_contents, list_exports, lookup_path, mount_filesystem, FileHandle, ProgressFn,
};
use crate::rpc::{RpcConnector, RpcProgram, RpcTransport, UdpConnector, MOUNT_PROGRAM, NFS_PROGRAM};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use prolink_core::config::{NfsConfig, RetryConfig};
use prolink_core::types::{Device, MediaSlot};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Well known export name for a media slot
pub fn export_for_slot(slot: MediaSlot) -> Option<&'static str> {
    match slot {
        MediaSlot::Usb => Some("/C/"),
        MediaSlot::Sd => Some("/B/"),
        MediaSlot::Rb => Some("/"),
        _ => None,
    }
}

/// Arguments to [`FileFetchService::fetch_file`]
pub struct FetchFileOptions {
    pub device: Device,
    pub slot: MediaSlot,
    pub path: String,
    pub on_progress: Option<ProgressFn>,
}

impl FetchFileOptions {
    pub fn new(device: Device, slot: MediaSlot, path: impl Into<String>) -> Self {
        Self {
            device,
            slot,
            path: path.into(),
            on_progress: None,
        }
    }

    /// Sets a callback invoked after every chunk read
    pub fn with_progress(mut self, on_progress: ProgressFn) -> Self {
        self.on_progress = Some(on_progress);
        self
    }
}

/// Transport and bound programs for one device
struct ClientSet {
    transport: Arc<dyn RpcTransport>,
    mount: RpcProgram,
    nfs: RpcProgram,
}

type ClientSlot = Arc<Mutex<Option<Arc<ClientSet>>>>;
type RootHandleSlot = Arc<Mutex<Option<FileHandle>>>;

/// Fetches files from device NFS exports, caching connections and root handles.
pub struct FileFetchService<C = UdpConnector> {
    connector: C,
    clients: DashMap<Ipv4Addr, ClientSlot>,
    root_handles: DashMap<(Ipv4Addr, MediaSlot), RootHandleSlot>,
    retry: RwLock<RetryConfig>,
    read_chunk_size: u32,
}

impl FileFetchService<UdpConnector> {
    /// Creates a service talking UDP to real devices.
    pub fn new(config: &NfsConfig) -> Self {
        Self::with_connector(config, UdpConnector)
    }
}

impl<C: RpcConnector> FileFetchService<C> {
    pub fn with_connector(config: &NfsConfig, connector: C) -> Self {
        Self {
            connector,
            clients: DashMap::new(),
            root_handles: DashMap::new(),
            retry: RwLock::new(config.retry.clone()),
            read_chunk_size: config.read_chunk_size,
        }
    }

    /// Fetches a file off a device's media slot.
    ///
    /// A failed path lookup is retried exactly once after re-mounting the
    /// slot's export, which recovers from root handles invalidated by media
    /// changes. A slot the device does not export fails immediately.
    #[instrument(skip(self, options), fields(device_id = options.device.id, slot = %options.slot, path = %options.path))]
    pub async fn fetch_file(&self, options: FetchFileOptions) -> Result<Bytes> {
        let FetchFileOptions {
            device,
            slot,
            path,
            mut on_progress,
        } = options;

        let clients = self.get_clients(device.ip).await?;
        let root = self.get_root_handle(&device, slot, &clients).await?;

        let (clients, file) = match lookup_path(&clients.nfs, &root, &path).await {
            Ok(file) => (clients, file),
            Err(e) => {
                warn!(error = %e, "Path lookup failed, refreshing root handle");
                self.evict_root_handle(device.ip, slot);

                // A dead transport is replaced before the retry
                let clients = if e.is_transient() {
                    self.get_clients(device.ip).await?
                } else {
                    clients
                };

                let root = self.get_root_handle(&device, slot, &clients).await?;
                let file = lookup_path(&clients.nfs, &root, &path)
                    .await
                    .map_err(NfsError::into_not_found)?;
                (clients, file)
            }
        };

        fetch_file_contents(&clients.nfs, &file, self.read_chunk_size, on_progress.as_mut()).await
    }

    async fn get_clients(&self, ip: Ipv4Addr) -> Result<Arc<ClientSet>> {
        let slot = self.clients.entry(ip).or_default().clone();
        let mut cached = slot.lock().await;

        if let Some(set) = cached.as_ref() {
            if set.transport.is_connected() {
                return Ok(set.clone());
            }
            debug!(address = %ip, "Cached RPC transport disconnected, reconnecting");
            *cached = None;
        }

        let retry = self.retry.read().clone();
        let transport = self.connector.connect(ip, retry).await?;
        let mount = RpcProgram::bind(transport.clone(), MOUNT_PROGRAM).await?;
        let nfs = RpcProgram::bind(transport.clone(), NFS_PROGRAM).await?;

        info!(
            address = %ip,
            mount_port = mount.port(),
            nfs_port = nfs.port(),
            "NFS clients ready"
        );

        let set = Arc::new(ClientSet {
            transport,
            mount,
            nfs,
        });
        *cached = Some(set.clone());

        Ok(set)
    }

    async fn get_root_handle(
        &self,
        device: &Device,
        slot: MediaSlot,
        clients: &ClientSet,
    ) -> Result<FileHandle> {
        let export_name = export_for_slot(slot).ok_or(NfsError::UnsupportedSlot(slot))?;

        let cell = self.root_handles.entry((device.ip, slot)).or_default().clone();
        let mut cached = cell.lock().await;

        if let Some(handle) = cached.as_ref() {
            return Ok(handle.clone());
        }

        let exports = list_exports(&clients.mount).await?;
        let export = exports
            .iter()
            .find(|e| e.filesystem == export_name)
            .ok_or(NfsError::SlotNotExported {
                slot,
                device_id: device.id,
            })?;

        let handle = mount_filesystem(&clients.mount, export).await?;
        debug!(address = %device.ip, export = export_name, "Mounted export");

        *cached = Some(handle.clone());
        Ok(handle)
    }

    fn evict_root_handle(&self, ip: Ipv4Addr, slot: MediaSlot) {
        self.root_handles.remove(&(ip, slot));
    }

    /// Drops the cached transport and every root handle for the device.
    pub fn reset_device_cache(&self, device: &Device) {
        let ip = device.ip;
        self.clients.remove(&ip);
        self.root_handles.retain(|(address, _), _| *address != ip);

        info!(device_id = device.id, address = %ip, "NFS cache reset");
    }

    /// Replaces the retry policy for new transports and pushes it into every
    /// cached one. An invalid policy is rejected and nothing changes.
    pub async fn configure_retry_strategy(&self, config: RetryConfig) -> Result<()> {
        config.validate()?;
        *self.retry.write() = config.clone();

        let slots: Vec<ClientSlot> = self.clients.iter().map(|e| e.value().clone()).collect();
        for slot in slots {
            if let Some(set) = slot.lock().await.as_ref() {
                set.transport.set_retry_config(config.clone());
            }
        }

        debug!(max_attempts = config.max_attempts, "Retry strategy updated");
        Ok(())
    }

    /// Retry policy used for new transports
    pub fn retry_config(&self) -> RetryConfig {
        self.retry.read().clone()
    }

    /// True when a transport for `ip` is cached (connected or not)
    pub async fn has_cached_clients(&self, ip: Ipv4Addr) -> bool {
        let Some(slot) = self.clients.get(&ip).map(|e| e.value().clone()) else {
            return false;
        };
        let cached = slot.lock().await;
        cached.is_some()
    }

    /// Slots of `ip` with a mounted root handle
    pub async fn cached_root_handles(&self, ip: Ipv4Addr) -> Vec<MediaSlot> {
        let cells: Vec<(MediaSlot, RootHandleSlot)> = self
            .root_handles
            .iter()
            .filter(|e| e.key().0 == ip)
            .map(|e| (e.key().1, e.value().clone()))
            .collect();

        let mut slots = Vec::new();
        for (slot, cell) in cells {
            if cell.lock().await.is_some() {
                slots.push(slot);
            }
        }
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPlayer;
    use crate::programs::FetchProgress;
    use prolink_core::types::DeviceType;
    use std::sync::Mutex as StdMutex;

    fn device() -> Device {
        Device {
            id: 2,
            device_type: DeviceType::Cdj,
            name: "CDJ-3000".to_string(),
            ip: Ipv4Addr::new(169, 254, 1, 2),
            mac_addr: [0, 1, 2, 3, 4, 5],
        }
    }

    fn service(player: &MockPlayer) -> FileFetchService<MockPlayer> {
        let config = NfsConfig {
            read_chunk_size: 4,
            ..Default::default()
        };
        FileFetchService::with_connector(&config, player.clone())
    }

    fn player() -> MockPlayer {
        let player = MockPlayer::new(&["/C/", "/"]);
        player.add_file("/C/", "Contents/Artist/track.mp3", b"0123456789");
        player.add_file("/", "PIONEER/rekordbox/export.pdb", b"pdb");
        player
    }

    #[tokio::test]
    async fn test_fetch_file_with_progress() {
        let player = player();
        let service = service(&player);

        let progress = Arc::new(StdMutex::new(Vec::new()));
        let seen = progress.clone();

        let options = FetchFileOptions::new(device(), MediaSlot::Usb, "/Contents/Artist/track.mp3")
            .with_progress(Box::new(move |p| seen.lock().unwrap().push(p)));

        let contents = service.fetch_file(options).await.unwrap();
        assert_eq!(&contents[..], b"0123456789");

        let progress = progress.lock().unwrap();
        assert_eq!(
            *progress,
            vec![
                FetchProgress { read: 4, total: 10 },
                FetchProgress { read: 8, total: 10 },
                FetchProgress { read: 10, total: 10 },
            ]
        );
    }

    #[tokio::test]
    async fn test_connection_and_root_handle_are_cached() {
        let player = player();
        let service = service(&player);

        for _ in 0..3 {
            service
                .fetch_file(FetchFileOptions::new(device(), MediaSlot::Usb, "Contents/Artist/track.mp3"))
                .await
                .unwrap();
        }

        let counters = player.counters();
        assert_eq!(counters.connects, 1);
        assert_eq!(counters.exports, 1);
        assert_eq!(counters.mounts, 1);
        assert!(service.has_cached_clients(device().ip).await);
        assert_eq!(service.cached_root_handles(device().ip).await, vec![MediaSlot::Usb]);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_connect_once() {
        let player = player();
        let service = Arc::new(service(&player));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .fetch_file(FetchFileOptions::new(device(), MediaSlot::Rb, "PIONEER/rekordbox/export.pdb"))
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(&task.await.unwrap().unwrap()[..], b"pdb");
        }

        let counters = player.counters();
        assert_eq!(counters.connects, 1);
        assert_eq!(counters.mounts, 1);
    }

    #[tokio::test]
    async fn test_stale_root_handle_is_refreshed_once() {
        let player = player();
        let service = service(&player);
        let path = "Contents/Artist/track.mp3";

        service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Usb, path))
            .await
            .unwrap();

        player.change_media();
        let before = player.counters();

        let contents = service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Usb, path))
            .await
            .unwrap();
        assert_eq!(&contents[..], b"0123456789");

        let after = player.counters();
        assert_eq!(after.exports - before.exports, 1);
        assert_eq!(after.mounts - before.mounts, 1);
        // One stale lookup, then three segments on the fresh handle
        assert_eq!(after.lookups - before.lookups, 4);
        assert_eq!(after.connects, 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_retried_exactly_once() {
        let player = player();
        let service = service(&player);

        let result = service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Usb, "missing.mp3"))
            .await;

        assert!(matches!(result, Err(NfsError::PathNotFound { .. })));

        let counters = player.counters();
        assert_eq!(counters.lookups, 2);
        assert_eq!(counters.exports, 2);
        assert_eq!(counters.mounts, 2);
        assert_eq!(counters.reads, 0);
    }

    #[tokio::test]
    async fn test_persistently_stale_handle_surfaces_not_found() {
        let player = player();
        let service = service(&player);
        let path = "Contents/Artist/track.mp3";

        service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Usb, path))
            .await
            .unwrap();

        // Swap out the media between the stale lookup and the retry
        player.change_media();
        let player_clone = player.clone();
        let handle = tokio::spawn(async move {
            for _ in 0..64 {
                tokio::task::yield_now().await;
                if player_clone.counters().mounts >= 2 {
                    player_clone.change_media();
                    return;
                }
            }
        });

        let result = service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Usb, path))
            .await;
        handle.await.unwrap();

        match result {
            Err(NfsError::PathNotFound { status, .. }) => {
                assert_eq!(status, crate::programs::NFSERR_STALE)
            }
            // The retry may win the race against the second media change
            Ok(contents) => assert_eq!(&contents[..], b"0123456789"),
            Err(e) => panic!("unexpected error: {}", e),
        }
        assert_eq!(player.counters().mounts, 2);
    }

    #[tokio::test]
    async fn test_unexported_slot_fails_without_lookup() {
        let player = MockPlayer::new(&["/"]);
        let service = service(&player);

        let result = service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Sd, "Contents/track.mp3"))
            .await;

        assert!(matches!(
            result,
            Err(NfsError::SlotNotExported {
                slot: MediaSlot::Sd,
                device_id: 2
            })
        ));

        let counters = player.counters();
        assert_eq!(counters.exports, 1);
        assert_eq!(counters.mounts, 0);
        assert_eq!(counters.lookups, 0);
    }

    #[tokio::test]
    async fn test_unsupported_slot() {
        let player = player();
        let service = service(&player);

        let result = service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Cd, "track.mp3"))
            .await;
        assert!(matches!(result, Err(NfsError::UnsupportedSlot(MediaSlot::Cd))));
    }

    #[tokio::test]
    async fn test_reset_device_cache_recreates_everything() {
        let player = player();
        let service = service(&player);
        let path = "Contents/Artist/track.mp3";

        service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Usb, path))
            .await
            .unwrap();

        service.reset_device_cache(&device());
        assert!(!service.has_cached_clients(device().ip).await);
        assert!(service.cached_root_handles(device().ip).await.is_empty());

        service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Usb, path))
            .await
            .unwrap();

        let counters = player.counters();
        assert_eq!(counters.connects, 2);
        assert_eq!(counters.exports, 2);
        assert_eq!(counters.mounts, 2);
    }

    #[tokio::test]
    async fn test_disconnected_transport_is_replaced() {
        let player = player();
        let service = service(&player);
        let path = "PIONEER/rekordbox/export.pdb";

        service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Rb, path))
            .await
            .unwrap();

        player.transports()[0].drop_connection();

        service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Rb, path))
            .await
            .unwrap();

        assert_eq!(player.counters().connects, 2);
        assert_eq!(player.transports().len(), 2);
        // Root handle survives a reconnect
        assert_eq!(player.counters().mounts, 1);
    }

    #[tokio::test]
    async fn test_configure_retry_strategy_reaches_live_transports() {
        let player = player();
        let service = service(&player);

        service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Rb, "PIONEER/rekordbox/export.pdb"))
            .await
            .unwrap();

        let retry = RetryConfig {
            max_attempts: 9,
            ..Default::default()
        };
        service.configure_retry_strategy(retry.clone()).await.unwrap();

        assert_eq!(service.retry_config(), retry);
        assert_eq!(player.transports()[0].retry_config(), retry);

        // New transports start with the new policy too
        player.transports()[0].drop_connection();
        service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Rb, "PIONEER/rekordbox/export.pdb"))
            .await
            .unwrap();
        assert_eq!(player.transports()[1].retry_config(), retry);
    }

    #[tokio::test]
    async fn test_invalid_retry_strategy_is_rejected() {
        let player = player();
        let service = service(&player);

        service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Rb, "PIONEER/rekordbox/export.pdb"))
            .await
            .unwrap();
        let before = service.retry_config();

        let zero_attempts = RetryConfig {
            max_attempts: 0,
            ..Default::default()
        };
        let result = service.configure_retry_strategy(zero_attempts).await;

        assert!(matches!(result, Err(NfsError::InvalidRetryConfig(_))));
        assert_eq!(service.retry_config(), before);
        assert_eq!(player.transports()[0].retry_config(), before);
    }

    #[tokio::test]
    async fn test_transport_lost_during_lookup_is_replaced() {
        let player = player();
        let service = service(&player);
        player.drop_connection_on_next_lookup();

        let contents = service
            .fetch_file(FetchFileOptions::new(device(), MediaSlot::Usb, "Contents/Artist/track.mp3"))
            .await
            .unwrap();

        assert_eq!(&contents[..], b"0123456789");
        assert_eq!(player.counters().connects, 2);
        assert_eq!(player.counters().mounts, 2);
    }

    #[test]
    fn test_fetch_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let player = player();
        let service = service(&player);
        let fetch = service.fetch_file(FetchFileOptions::new(device(), MediaSlot::Usb, "a/b/c.mp3"));
        assert_send(&fetch);
    }
}
