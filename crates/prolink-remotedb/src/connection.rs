//! A session with one device's remote database server.
//!
//! The protocol has no multiplexing: every exchange on a connection happens
//! under its async mutex, in arrival order. Reading a message of the wrong
//! type leaves the byte stream at an unknown position, so the connection is
//! poisoned and every later use fails with [`RemoteDbError::Desynced`].

use crate::codec::MessageCodec;
use crate::error::{RemoteDbError, Result};
use crate::fields::Field;
use crate::message::{Message, MessageType, SETUP_TRANSACTION_ID};
use crate::query::LookupDescriptor;
use crate::render::MenuItems;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use prolink_core::config::RemoteDbConfig;
use prolink_core::types::{Device, DeviceId, MediaSlot, TrackType};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

/// Byte stream a connection runs over
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

type MessageStream = Framed<Box<dyn AsyncStream>, MessageCodec>;

const PORT_QUERY_SERVICE: &[u8] = b"RemoteDBServer\0";

/// Asks the device which TCP port its database server listens on.
#[instrument(skip(config))]
pub async fn query_database_port(address: Ipv4Addr, config: &RemoteDbConfig) -> Result<u16> {
    let target = SocketAddr::V4(SocketAddrV4::new(address, config.query_port));
    let mut stream = connect_tcp(target, config.connect_timeout()).await?;

    let mut request = BytesMut::with_capacity(4 + PORT_QUERY_SERVICE.len());
    request.extend_from_slice(&(PORT_QUERY_SERVICE.len() as u32).to_be_bytes());
    request.extend_from_slice(PORT_QUERY_SERVICE);
    stream.write_all(&request).await?;

    let port = timeout(config.read_timeout(), stream.read_u16())
        .await
        .map_err(|_| RemoteDbError::Timeout {
            operation: "reading the database port",
        })??;

    debug!(address = %address, port = port, "Database port resolved");
    Ok(port)
}

async fn connect_tcp(target: SocketAddr, connect_timeout: Duration) -> Result<TcpStream> {
    let stream = timeout(connect_timeout, TcpStream::connect(target))
        .await
        .map_err(|_| RemoteDbError::ConnectFailed {
            address: target.to_string(),
            reason: "connection timeout".to_string(),
        })?
        .map_err(|e| RemoteDbError::ConnectFailed {
            address: target.to_string(),
            reason: e.to_string(),
        })?;

    stream.set_nodelay(true)?;
    let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(30));
    socket2::SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;

    Ok(stream)
}

/// Remote database session with one device
pub struct Connection {
    device: Device,
    host_device_id: DeviceId,
    read_timeout: Duration,
    stream: Mutex<MessageStream>,
    next_txid: AtomicU32,
    desynced: AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("device", &self.device)
            .field("host_device_id", &self.host_device_id)
            .field("desynced", &self.is_desynced())
            .finish()
    }
}

impl Connection {
    /// Connects to the device's database server and performs the handshake.
    #[instrument(skip(device, config), fields(device_id = device.id, address = %device.ip))]
    pub async fn connect(device: &Device, config: &RemoteDbConfig) -> Result<Self> {
        let port = query_database_port(device.ip, config).await?;
        let target = SocketAddr::V4(SocketAddrV4::new(device.ip, port));
        let stream = connect_tcp(target, config.connect_timeout()).await?;

        let conn = Self::establish(stream, device.clone(), config).await?;
        info!(port = port, "Remote database connected");

        Ok(conn)
    }

    /// Runs the greeting and setup exchange over an already open stream.
    pub async fn establish<S>(mut stream: S, device: Device, config: &RemoteDbConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let device_id = device.id;
        let handshake_error = |reason: String| RemoteDbError::Handshake { device_id, reason };

        let mut greeting = BytesMut::new();
        Field::UInt32(1).encode(&mut greeting);
        stream.write_all(&greeting).await?;

        let mut reply = [0u8; 5];
        timeout(config.read_timeout(), stream.read_exact(&mut reply))
            .await
            .map_err(|_| RemoteDbError::Timeout {
                operation: "waiting for the greeting",
            })??;

        if reply[..] != greeting[..] {
            return Err(handshake_error(format!("unexpected greeting {:02x?}", reply)));
        }

        let boxed: Box<dyn AsyncStream> = Box::new(stream);
        let conn = Self {
            host_device_id: config.host_device_id,
            read_timeout: config.read_timeout(),
            stream: Mutex::new(Framed::new(boxed, MessageCodec)),
            next_txid: AtomicU32::new(1),
            desynced: AtomicBool::new(false),
            device,
        };

        {
            let mut guard = conn.lock().await?;
            let setup = Message::new(
                SETUP_TRANSACTION_ID,
                MessageType::Setup,
                vec![Field::UInt32(conn.host_device_id as u32)],
            );
            guard.send(setup).await?;
            guard
                .read_message(MessageType::Success)
                .await
                .map_err(|e| handshake_error(format!("setup failed: {}", e)))?;
        }

        debug!(
            device_id = conn.device.id,
            host_device_id = conn.host_device_id,
            "Remote database session set up"
        );

        Ok(conn)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn host_device_id(&self) -> DeviceId {
        self.host_device_id
    }

    /// Descriptor addressing `slot` on behalf of this connection's host
    pub fn descriptor(&self, slot: MediaSlot, track_type: TrackType) -> LookupDescriptor {
        LookupDescriptor::new(self.host_device_id, slot, track_type)
    }

    /// True once the stream position can no longer be trusted
    pub fn is_desynced(&self) -> bool {
        self.desynced.load(Ordering::SeqCst)
    }

    fn poison(&self) {
        if !self.desynced.swap(true, Ordering::SeqCst) {
            warn!(device_id = self.device.id, "Remote database connection desynchronized");
        }
    }

    /// Waits for exclusive use of the connection
    pub async fn lock(&self) -> Result<ConnectionGuard<'_>> {
        let stream = self.stream.lock().await;
        if self.is_desynced() {
            return Err(RemoteDbError::Desynced);
        }
        Ok(ConnectionGuard { conn: self, stream })
    }

    /// Ends the session with a teardown request. Every later use fails.
    pub async fn close(&self) -> Result<()> {
        let mut guard = self.lock().await?;
        guard.write_message(MessageType::Teardown, Vec::new()).await?;
        self.desynced.store(true, Ordering::SeqCst);

        debug!(device_id = self.device.id, "Remote database session closed");
        Ok(())
    }

    /// Sends one request and reads exactly one response of type `expected`.
    pub async fn query_single(
        &self,
        kind: MessageType,
        descriptor: LookupDescriptor,
        args: Vec<Field>,
        expected: MessageType,
    ) -> Result<Message> {
        self.lock()
            .await?
            .query_single(kind, descriptor, args, expected)
            .await
    }

    /// Issues a lookup request and returns the number of items it produced.
    pub async fn lookup(
        &self,
        kind: MessageType,
        descriptor: LookupDescriptor,
        args: Vec<Field>,
    ) -> Result<u32> {
        self.lock().await?.lookup(kind, descriptor, args).await
    }

    /// Pages through `total` items of the menu produced by the last lookup.
    pub async fn render_items(&self, descriptor: LookupDescriptor, total: u32) -> Result<MenuItems<'_>> {
        Ok(self.lock().await?.render_items(descriptor, total))
    }

    /// Lookup followed by rendering, without releasing the connection in
    /// between.
    pub async fn query_menu(
        &self,
        kind: MessageType,
        descriptor: LookupDescriptor,
        args: Vec<Field>,
    ) -> Result<MenuItems<'_>> {
        let mut guard = self.lock().await?;
        let total = guard.lookup(kind, descriptor, args).await?;
        Ok(guard.render_items(descriptor, total))
    }
}

/// Exclusive access to a [`Connection`]
pub struct ConnectionGuard<'a> {
    conn: &'a Connection,
    stream: MutexGuard<'a, MessageStream>,
}

impl<'a> ConnectionGuard<'a> {
    pub fn connection(&self) -> &'a Connection {
        self.conn
    }

    /// Marks the connection unusable
    pub fn poison(&self) {
        self.conn.poison();
    }

    fn fail<T>(&self, error: RemoteDbError) -> Result<T> {
        if error.poisons_connection() {
            self.conn.poison();
        }
        Err(error)
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        debug!(kind = ?message.kind, txid = message.transaction_id, "Sending message");
        match self.stream.send(message).await {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    /// Writes a request with a fresh transaction id, returning the id.
    pub async fn write_message(&mut self, kind: MessageType, args: Vec<Field>) -> Result<u32> {
        let txid = self.conn.next_txid.fetch_add(1, Ordering::Relaxed);
        self.send(Message::new(txid, kind, args)).await?;
        Ok(txid)
    }

    /// Reads the next message, which must be of type `expected`.
    pub async fn read_message(&mut self, expected: MessageType) -> Result<Message> {
        let message = match timeout(self.conn.read_timeout, self.stream.next()).await {
            Err(_) => {
                return self.fail(RemoteDbError::Timeout {
                    operation: "waiting for a response",
                })
            }
            Ok(None) => return self.fail(RemoteDbError::Closed),
            Ok(Some(Err(e))) => return self.fail(e),
            Ok(Some(Ok(message))) => message,
        };

        if message.kind != expected {
            return self.fail(RemoteDbError::ProtocolDesync {
                expected,
                actual: message.kind,
            });
        }

        Ok(message)
    }

    pub async fn query_single(
        &mut self,
        kind: MessageType,
        descriptor: LookupDescriptor,
        args: Vec<Field>,
        expected: MessageType,
    ) -> Result<Message> {
        let mut all_args = Vec::with_capacity(args.len() + 1);
        all_args.push(descriptor.to_field());
        all_args.extend(args);

        self.write_message(kind, all_args).await?;
        self.read_message(expected).await
    }

    pub async fn lookup(
        &mut self,
        kind: MessageType,
        descriptor: LookupDescriptor,
        args: Vec<Field>,
    ) -> Result<u32> {
        let response = self
            .query_single(kind, descriptor, args, MessageType::Success)
            .await?;
        let total = response.u32_arg(1)?;

        debug!(kind = ?kind, total = total, "Lookup complete");
        Ok(total)
    }

    /// Turns the guard into a pager over `total` menu items.
    pub fn render_items(self, descriptor: LookupDescriptor, total: u32) -> MenuItems<'a> {
        MenuItems::new(self, descriptor, total)
    }
}
