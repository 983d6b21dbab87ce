//! Device lifecycle manager.
//!
//! Every valid announce either creates a liveness record (emitting
//! `Connected` then `Announced`) or refreshes the existing one (emitting
//! `Announced`). Each record owns an expiry timer; when it fires the record is
//! removed and `Disconnected` is emitted with the last known device.

use crate::error::{DiscoveryError, Result};
use crate::packet::parse_announce;
use crate::types::{DeviceEvent, DeviceEventKind};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use prolink_core::config::DiscoveryConfig;
use prolink_core::types::{Device, DeviceId};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Largest datagram read from the announce socket
const MAX_DATAGRAM_SIZE: usize = 2048;

/// Pause after a failed receive before reading again
const RECV_ERROR_DELAY: Duration = Duration::from_millis(50);

/// Tracks which devices are live on the network
pub struct DeviceManager {
    inner: Arc<Inner>,

    /// Running state of the receive loop
    running: Arc<AtomicBool>,

    /// Receive loop handle
    listener: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    /// Liveness records keyed by device id
    devices: DashMap<DeviceId, LivenessRecord>,

    /// Timeout applied to every future expiry scheduling
    device_timeout: RwLock<Duration>,

    /// Announcements carrying this name are our own and never tracked
    virtual_cdj_name: String,

    /// Source of record generations, used to discard superseded timers
    next_generation: AtomicU64,

    waiters: WaiterRegistry,

    event_tx: broadcast::Sender<DeviceEvent>,
}

struct LivenessRecord {
    device: Device,
    generation: u64,
    expiry: JoinHandle<()>,
}

impl DeviceManager {
    /// Creates a manager from the discovery configuration
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| DiscoveryError::InvalidConfig(e.to_string()))?;

        let (event_tx, _) = broadcast::channel(config.event_capacity);

        info!(
            device_timeout_ms = config.device_timeout_ms,
            "Device manager created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                devices: DashMap::new(),
                device_timeout: RwLock::new(config.device_timeout()),
                virtual_cdj_name: config.virtual_cdj.name.clone(),
                next_generation: AtomicU64::new(0),
                waiters: WaiterRegistry::default(),
                event_tx,
            }),
            running: Arc::new(AtomicBool::new(false)),
            listener: Mutex::new(None),
        })
    }

    /// Subscribes to device lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Snapshot of currently live devices
    pub fn devices(&self) -> HashMap<DeviceId, Device> {
        self.inner
            .devices
            .iter()
            .map(|entry| (*entry.key(), entry.value().device.clone()))
            .collect()
    }

    /// Gets a live device by id
    pub fn get_device(&self, id: DeviceId) -> Option<Device> {
        self.inner.devices.get(&id).map(|r| r.device.clone())
    }

    /// Number of live devices
    pub fn device_count(&self) -> usize {
        self.inner.devices.len()
    }

    /// Current device timeout
    pub fn device_timeout(&self) -> Duration {
        *self.inner.device_timeout.read()
    }

    /// Replaces the device timeout.
    ///
    /// Timers already running keep their deadline; the next announce of each
    /// device is scheduled with the new timeout. A zero timeout is rejected.
    pub fn reconfigure(&self, device_timeout: Duration) -> Result<()> {
        if device_timeout.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "device timeout must be greater than 0".to_string(),
            ));
        }

        info!(
            device_timeout_ms = device_timeout.as_millis() as u64,
            "Reconfiguring device timeout"
        );
        *self.inner.device_timeout.write() = device_timeout;
        Ok(())
    }

    /// Waits up to `timeout` for device `id` to be live.
    ///
    /// Resolves immediately when the device is already known, with the device
    /// on its first `Connected` event, or with `None` once the timeout
    /// elapses. Dropping the future removes the pending waiter.
    pub async fn get_device_ensured(&self, id: DeviceId, timeout: Duration) -> Option<Device> {
        if let Some(device) = self.get_device(id) {
            return Some(device);
        }

        let (token, rx) = self.inner.waiters.register(id);
        let _guard = WaiterGuard {
            registry: &self.inner.waiters,
            id,
            token,
        };

        // The device may have connected between the lookup and registration
        if let Some(device) = self.get_device(id) {
            return Some(device);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(device)) => Some(device),
            _ => {
                debug!(device_id = id, "Timed out waiting for device");
                None
            }
        }
    }

    /// Number of callers currently blocked in [`get_device_ensured`](Self::get_device_ensured)
    pub fn pending_waiters(&self) -> usize {
        self.inner.waiters.len()
    }

    /// Handles one inbound datagram.
    ///
    /// Returns the announced device when the packet was accepted. Malformed
    /// packets and our own virtual CDJ announcements are dropped.
    pub fn handle_packet(&self, packet: &[u8]) -> Option<Device> {
        Inner::accept(&self.inner, packet)
    }

    /// Starts the receive loop on `socket`
    pub fn start(&self, socket: Arc<UdpSocket>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DiscoveryError::AlreadyStarted);
        }

        let inner = Arc::downgrade(&self.inner);
        let running = self.running.clone();

        let task = tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM_SIZE];

            while running.load(Ordering::SeqCst) {
                let (len, src) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        // ICMP errors from earlier sends surface here; the socket stays usable
                        warn!(error = %e, "Error receiving announce packet");
                        tokio::time::sleep(RECV_ERROR_DELAY).await;
                        continue;
                    }
                };

                let Some(inner) = inner.upgrade() else {
                    break;
                };

                trace!(len = len, source = %src, "Received datagram");
                Inner::accept(&inner, &buf[..len]);
            }

            running.store(false, Ordering::SeqCst);
            debug!("Announce listener stopped");
        });

        *self.listener.lock() = Some(task);
        info!("Listening for device announcements");
        Ok(())
    }

    /// Stops the receive loop. Live devices keep their records until they expire.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.listener.lock().take() {
            task.abort();
            info!("Device manager stopped");
        }
    }

    /// Returns whether the receive loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.stop();
        for entry in self.inner.devices.iter() {
            entry.value().expiry.abort();
        }
    }
}

impl Inner {
    /// Parses one datagram and records the announce unless it is malformed
    /// or our own.
    fn accept(this: &Arc<Self>, packet: &[u8]) -> Option<Device> {
        let device = match parse_announce(packet) {
            Ok(device) => device,
            Err(e) => {
                trace!(error = %e, len = packet.len(), "Dropping packet");
                return None;
            }
        };

        if device.name == this.virtual_cdj_name {
            trace!(device_id = device.id, "Ignoring virtual CDJ announcement");
            return None;
        }

        Self::announce(this, device.clone());
        Some(device)
    }

    fn announce(this: &Arc<Self>, device: Device) {
        let timeout = *this.device_timeout.read();
        let deadline = Instant::now() + timeout;
        let generation = this.next_generation.fetch_add(1, Ordering::Relaxed);
        let expiry = Self::schedule_expiry(this, device.id, generation, deadline);

        // Events are sent while the entry is held so announces and expiry for
        // one id are observed in order.
        match this.devices.entry(device.id) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.expiry.abort();
                record.expiry = expiry;
                record.generation = generation;
                record.device = device.clone();

                trace!(device_id = device.id, "Device refreshed");
                this.emit(DeviceEventKind::Announced, device);
            }
            Entry::Vacant(entry) => {
                entry.insert(LivenessRecord {
                    device: device.clone(),
                    generation,
                    expiry,
                });

                info!(
                    device_id = device.id,
                    name = %device.name,
                    ip = %device.ip,
                    device_type = %device.device_type,
                    "Device connected"
                );
                this.emit(DeviceEventKind::Connected, device.clone());
                this.waiters.resolve(&device);
                this.emit(DeviceEventKind::Announced, device);
            }
        }
    }

    fn schedule_expiry(
        this: &Arc<Self>,
        id: DeviceId,
        generation: u64,
        deadline: Instant,
    ) -> JoinHandle<()> {
        let inner: Weak<Self> = Arc::downgrade(this);

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = inner.upgrade() {
                inner.expire(id, generation);
            }
        })
    }

    fn expire(&self, id: DeviceId, generation: u64) {
        if let Entry::Occupied(entry) = self.devices.entry(id) {
            // A refresh that raced with this timer owns the record now
            if entry.get().generation != generation {
                return;
            }

            let device = entry.get().device.clone();
            info!(device_id = id, name = %device.name, "Device disconnected");
            self.emit(DeviceEventKind::Disconnected, device);
            entry.remove();
        }
    }

    fn emit(&self, kind: DeviceEventKind, device: Device) {
        // No subscribers is not an error
        let _ = self.event_tx.send(DeviceEvent::new(kind, device));
    }
}

/// Pending `get_device_ensured` callers keyed by device id
#[derive(Default)]
struct WaiterRegistry {
    next_token: AtomicU64,
    waiters: Mutex<HashMap<DeviceId, Vec<(u64, oneshot::Sender<Device>)>>>,
}

impl WaiterRegistry {
    fn register(&self, id: DeviceId) -> (u64, oneshot::Receiver<Device>) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().entry(id).or_default().push((token, tx));
        (token, rx)
    }

    fn remove(&self, id: DeviceId, token: u64) {
        let mut waiters = self.waiters.lock();
        if let Some(list) = waiters.get_mut(&id) {
            list.retain(|(t, _)| *t != token);
            if list.is_empty() {
                waiters.remove(&id);
            }
        }
    }

    fn resolve(&self, device: &Device) {
        let pending = self.waiters.lock().remove(&device.id);
        for (_, tx) in pending.into_iter().flatten() {
            let _ = tx.send(device.clone());
        }
    }

    fn len(&self) -> usize {
        self.waiters.lock().values().map(Vec::len).sum()
    }
}

/// Removes a waiter registration when its future completes or is dropped
struct WaiterGuard<'a> {
    registry: &'a WaiterRegistry,
    id: DeviceId,
    token: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.id, self.token);
    }
}

/// Binds a broadcast-capable UDP socket on the announce port
pub fn bind_announce_socket(config: &DiscoveryConfig) -> Result<UdpSocket> {
    let bind_ip = config.bind_ip.unwrap_or(Ipv4Addr::UNSPECIFIED);
    let addr = SocketAddr::new(IpAddr::V4(bind_ip), config.announce_port);

    let bind_failed = |e: std::io::Error| DiscoveryError::BindFailed {
        address: addr.to_string(),
        reason: e.to_string(),
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_failed)?;
    socket.set_reuse_address(true).map_err(bind_failed)?;
    socket.set_broadcast(true).map_err(bind_failed)?;
    socket.set_nonblocking(true).map_err(bind_failed)?;
    socket.bind(&SockAddr::from(addr)).map_err(bind_failed)?;

    let socket = UdpSocket::from_std(socket.into())?;
    info!(address = %addr, "Announce socket bound");
    Ok(socket)
}
