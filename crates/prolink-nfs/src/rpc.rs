//! ONC-RPC (RFC 5531) transport over UDP.
//!
//! A transport talks to a single device address. Calls on one transport are
//! serviced strictly one at a time in arrival order; each call is retried
//! according to the transport's current [`RetryConfig`], which may be replaced
//! at any time. Exhausted retries or socket failures flip the transport to
//! disconnected; callers notice on their next use and build a new one.

use crate::error::RpcError;
use crate::xdr::{XdrReader, XdrWriter};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use prolink_core::constants::PORTMAP_PORT;
pub use prolink_core::config::RetryConfig;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

const RPC_VERSION: u32 = 2;
const MSG_CALL: u32 = 0;
const MSG_REPLY: u32 = 1;
const MSG_ACCEPTED: u32 = 0;
const ACCEPT_SUCCESS: u32 = 0;
const AUTH_NULL: u32 = 0;
const AUTH_UNIX: u32 = 1;

/// Largest reply datagram accepted
const MAX_REPLY_SIZE: usize = 65536;

/// Remote program identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId {
    pub id: u32,
    pub version: u32,
}

/// Portmapper, used to locate the other programs
pub const PORTMAP_PROGRAM: ProgramId = ProgramId {
    id: 100000,
    version: 2,
};

/// Mount daemon
pub const MOUNT_PROGRAM: ProgramId = ProgramId {
    id: 100005,
    version: 1,
};

/// NFS version 2
pub const NFS_PROGRAM: ProgramId = ProgramId {
    id: 100003,
    version: 2,
};

const PMAPPROC_GETPORT: u32 = 3;
const IPPROTO_UDP: u32 = 17;

/// A single procedure call
#[derive(Debug, Clone)]
pub struct RpcCall {
    pub port: u16,
    pub program: ProgramId,
    pub procedure: u32,
    pub args: Bytes,
}

/// Connection to one device's RPC services
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Device address this transport talks to
    fn address(&self) -> Ipv4Addr;

    /// False once the transport has failed; it is never revived
    fn is_connected(&self) -> bool;

    /// Current retry policy
    fn retry_config(&self) -> RetryConfig;

    /// Replaces the retry policy for subsequent calls
    fn set_retry_config(&self, config: RetryConfig);

    /// Performs a call and returns the procedure results
    async fn call(&self, call: RpcCall) -> Result<Bytes, RpcError>;
}

/// Creates transports for device addresses
#[async_trait]
pub trait RpcConnector: Send + Sync {
    async fn connect(
        &self,
        address: Ipv4Addr,
        retry: RetryConfig,
    ) -> Result<Arc<dyn RpcTransport>, RpcError>;
}

/// Connector producing [`UdpTransport`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpConnector;

#[async_trait]
impl RpcConnector for UdpConnector {
    async fn connect(
        &self,
        address: Ipv4Addr,
        retry: RetryConfig,
    ) -> Result<Arc<dyn RpcTransport>, RpcError> {
        Ok(Arc::new(UdpTransport::connect(address, retry).await?))
    }
}

/// RPC over a UDP socket
pub struct UdpTransport {
    address: Ipv4Addr,
    socket: Mutex<UdpSocket>,
    next_xid: AtomicU32,
    connected: AtomicBool,
    retry: RwLock<RetryConfig>,
}

impl UdpTransport {
    /// Binds a local socket for talking to `address`
    #[instrument(skip(retry))]
    pub async fn connect(address: Ipv4Addr, retry: RetryConfig) -> Result<Self, RpcError> {
        let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)).await?;

        info!(address = %address, local = %socket.local_addr()?, "RPC transport ready");

        Ok(Self {
            address,
            socket: Mutex::new(socket),
            // Random-ish start so replies to a previous socket's calls never match
            next_xid: AtomicU32::new(std::process::id().wrapping_mul(0x9e37_79b9)),
            connected: AtomicBool::new(true),
            retry: RwLock::new(retry),
        })
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(address = %self.address, "RPC transport disconnected");
        }
    }

    /// Waits for the reply matching `xid`, dropping anything else.
    async fn recv_reply(&self, socket: &UdpSocket, xid: u32) -> Result<Bytes, RpcError> {
        let mut buf = vec![0u8; MAX_REPLY_SIZE];

        loop {
            let (len, src) = socket.recv_from(&mut buf).await?;

            if src.ip() != IpAddr::V4(self.address) || len < 4 {
                debug!(source = %src, "Dropping unexpected datagram");
                continue;
            }

            let reply_xid = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
            if reply_xid != xid {
                debug!(xid = reply_xid, expected = xid, "Dropping stale reply");
                continue;
            }

            return Ok(Bytes::copy_from_slice(&buf[4..len]));
        }
    }
}

#[async_trait]
impl RpcTransport for UdpTransport {
    fn address(&self) -> Ipv4Addr {
        self.address
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn retry_config(&self) -> RetryConfig {
        self.retry.read().clone()
    }

    fn set_retry_config(&self, config: RetryConfig) {
        *self.retry.write() = config;
    }

    async fn call(&self, call: RpcCall) -> Result<Bytes, RpcError> {
        if !self.is_connected() {
            return Err(RpcError::Disconnected);
        }

        // Held for the whole exchange: one call in flight per transport
        let socket = self.socket.lock().await;

        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        let message = encode_call(xid, &call);
        let target = SocketAddr::new(IpAddr::V4(self.address), call.port);
        let retry = self.retry_config();
        // Every call is sent at least once
        let max_attempts = retry.max_attempts.max(1);

        for attempt in 0..max_attempts {
            if let Err(e) = socket.send_to(&message, target).await {
                self.disconnect();
                return Err(e.into());
            }

            match timeout(retry.call_timeout(), self.recv_reply(&socket, xid)).await {
                Ok(Ok(reply)) => return decode_reply(reply),
                Ok(Err(e)) => {
                    self.disconnect();
                    return Err(e);
                }
                Err(_) => {
                    let remaining = max_attempts - attempt - 1;
                    if remaining == 0 {
                        break;
                    }

                    let backoff = retry.backoff(attempt);
                    warn!(
                        xid = xid,
                        program = call.program.id,
                        procedure = call.procedure,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        "RPC call timed out, retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        self.disconnect();
        Err(RpcError::Timeout {
            attempts: max_attempts,
        })
    }
}

/// Encodes an RPC CALL message with AUTH_UNIX credentials
pub fn encode_call(xid: u32, call: &RpcCall) -> Bytes {
    let mut w = XdrWriter::new();
    w.put_u32(xid)
        .put_u32(MSG_CALL)
        .put_u32(RPC_VERSION)
        .put_u32(call.program.id)
        .put_u32(call.program.version)
        .put_u32(call.procedure);

    // AUTH_UNIX: stamp, machine name, uid, gid, no auxiliary gids
    let mut cred = XdrWriter::new();
    cred.put_u32(0).put_string("").put_u32(0).put_u32(0).put_u32(0);
    w.put_u32(AUTH_UNIX).put_opaque(&cred.finish());

    w.put_u32(AUTH_NULL).put_opaque(&[]);
    w.put_raw(&call.args);
    w.finish()
}

/// Decodes an RPC reply (without its xid) into the procedure results
pub fn decode_reply(reply: Bytes) -> Result<Bytes, RpcError> {
    let mut r = XdrReader::new(reply);

    let msg_type = r.get_u32()?;
    if msg_type != MSG_REPLY {
        return Err(RpcError::MalformedReply(format!(
            "expected REPLY, got message type {}",
            msg_type
        )));
    }

    let reply_stat = r.get_u32()?;
    if reply_stat != MSG_ACCEPTED {
        let reject_stat = r.get_u32().unwrap_or(u32::MAX);
        return Err(RpcError::Denied { reject_stat });
    }

    // Verifier
    let _flavor = r.get_u32()?;
    r.get_opaque()?;

    let accept_stat = r.get_u32()?;
    if accept_stat != ACCEPT_SUCCESS {
        return Err(RpcError::Rejected { accept_stat });
    }

    Ok(r.into_rest())
}

/// A remote program bound to its port on a transport
#[derive(Clone)]
pub struct RpcProgram {
    transport: Arc<dyn RpcTransport>,
    program: ProgramId,
    port: u16,
}

impl std::fmt::Debug for RpcProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcProgram")
            .field("address", &self.transport.address())
            .field("program", &self.program)
            .field("port", &self.port)
            .finish()
    }
}

impl RpcProgram {
    /// Looks the program up in the device's portmapper
    pub async fn bind(transport: Arc<dyn RpcTransport>, program: ProgramId) -> Result<Self, RpcError> {
        let mut args = XdrWriter::new();
        args.put_u32(program.id)
            .put_u32(program.version)
            .put_u32(IPPROTO_UDP)
            .put_u32(0);

        let reply = transport
            .call(RpcCall {
                port: PORTMAP_PORT,
                program: PORTMAP_PROGRAM,
                procedure: PMAPPROC_GETPORT,
                args: args.finish(),
            })
            .await?;

        let port = XdrReader::new(reply).get_u32()?;
        if port == 0 || port > u16::MAX as u32 {
            return Err(RpcError::ProgramUnavailable {
                program: program.id,
                version: program.version,
            });
        }

        debug!(
            address = %transport.address(),
            program = program.id,
            version = program.version,
            port = port,
            "Program bound"
        );

        Ok(Self {
            transport,
            program,
            port: port as u16,
        })
    }

    pub async fn call(&self, procedure: u32, args: Bytes) -> Result<Bytes, RpcError> {
        self.transport
            .call(RpcCall {
                port: self.port,
                program: self.program,
                procedure,
                args,
            })
            .await
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
