//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use prolink_core::config::ProlinkConfig;
use prolink_core::types::{Device, DeviceType};
use prolink_remotedb::{Field, Message, MessageCodec, MessageType};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::codec::Framed;

/// A player at 127.0.0.1
pub fn local_player(id: u8) -> Device {
    Device {
        id,
        device_type: DeviceType::Cdj,
        name: format!("CDJ-{}", id),
        ip: Ipv4Addr::LOCALHOST,
        mac_addr: [0x00, 0xe0, 0x36, 0x00, 0x00, id],
    }
}

/// Configuration with short timeouts suited to tests
pub fn test_config(device_timeout_ms: u64, query_port: u16) -> ProlinkConfig {
    let mut config = ProlinkConfig::default();
    config.discovery.device_timeout_ms = device_timeout_ms;
    config.remotedb.query_port = query_port;
    config.remotedb.device_wait_ms = 500;
    config.remotedb.read_timeout_ms = 1000;
    config
}

/// Localhost UDP socket standing in for the announce socket, plus the address
/// announcements should be sent to.
pub async fn announce_socket() -> (Arc<UdpSocket>, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind announce socket");
    let addr = socket.local_addr().expect("Announce socket has no address");
    (Arc::new(socket), addr)
}

/// Sends one announce packet for `device` to `target`
pub async fn announce(device: &Device, target: SocketAddr) {
    let sender = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind sender socket");
    sender
        .send_to(&prolink_discovery::announce_packet(device), target)
        .await
        .expect("Failed to send announce packet");
}

/// Remote database server of a fake player.
///
/// Answers the port query, the greeting and setup, and serves every menu
/// request with a single track title item.
pub struct FakePlayer {
    pub query_port: u16,
    pub sessions: Arc<AtomicUsize>,
    /// Host ids sent in Setup requests, in arrival order
    pub setup_hosts: Arc<Mutex<Vec<u32>>>,
}

impl FakePlayer {
    pub async fn spawn(title: &'static str) -> Self {
        let query = TcpListener::bind("127.0.0.1:0").await.expect("bind query listener");
        let database = TcpListener::bind("127.0.0.1:0").await.expect("bind database listener");
        let query_port = query.local_addr().expect("query address").port();
        let database_port = database.local_addr().expect("database address").port();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = query.accept().await {
                let len = stream.read_u32().await.expect("query length");
                let mut name = vec![0u8; len as usize];
                stream.read_exact(&mut name).await.expect("query name");
                stream.write_u16(database_port).await.expect("query reply");
            }
        });

        let sessions = Arc::new(AtomicUsize::new(0));
        let setup_hosts = Arc::new(Mutex::new(Vec::new()));
        let (counter, hosts) = (sessions.clone(), setup_hosts.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = database.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_session(stream, title, hosts.clone()));
            }
        });

        Self {
            query_port,
            sessions,
            setup_hosts,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

async fn serve_session(mut stream: TcpStream, title: &'static str, hosts: Arc<Mutex<Vec<u32>>>) {
    let mut greeting = [0u8; 5];
    if stream.read_exact(&mut greeting).await.is_err() {
        return;
    }
    if stream.write_all(&greeting).await.is_err() {
        return;
    }

    let mut framed = Framed::new(stream, MessageCodec);
    while let Some(Ok(request)) = framed.next().await {
        let txid = request.transaction_id;
        let responses = match request.kind {
            MessageType::Setup => {
                hosts.lock().push(request.u32_arg(0).unwrap_or_default());
                vec![Message::new(txid, MessageType::Success, vec![Field::UInt32(0)])]
            }
            MessageType::RenderMenu => vec![
                Message::new(txid, MessageType::MenuHeader, vec![]),
                title_item(txid, title),
                Message::new(txid, MessageType::MenuFooter, vec![]),
            ],
            kind => vec![Message::new(
                txid,
                MessageType::Success,
                vec![Field::UInt32(kind.as_u16() as u32), Field::UInt32(1)],
            )],
        };

        for response in responses {
            if framed.send(response).await.is_err() {
                return;
            }
        }
    }
}

fn title_item(txid: u32, title: &str) -> Message {
    Message::new(
        txid,
        MessageType::MenuItem,
        vec![
            Field::UInt32(0),
            Field::UInt32(1),
            Field::UInt32((title.encode_utf16().count() as u32 + 1) * 2),
            Field::from(title),
            Field::UInt32(2),
            Field::from(""),
            Field::UInt32(0x0004),
            Field::UInt32(0),
            Field::UInt32(0),
        ],
    )
}

/// Polls `check` until it holds or `limit` elapses
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
