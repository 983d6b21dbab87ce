//! Scripted in-memory player for exercising the NFS stack without a network.

use crate::error::RpcError;
use crate::programs::{FHSIZE, NFSERR_NOENT, NFSERR_STALE, NFS_OK};
use crate::rpc::{
    RetryConfig, RpcCall, RpcConnector, RpcTransport, MOUNT_PROGRAM, NFS_PROGRAM, PORTMAP_PROGRAM,
};
use crate::xdr::{XdrReader, XdrWriter};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const MOUNT_PORT: u32 = 635;
const NFS_PORT: u32 = 2049;

/// Call counters, observable by tests
#[derive(Debug, Default, Clone)]
pub struct Counters {
    pub connects: usize,
    pub exports: usize,
    pub mounts: usize,
    pub lookups: usize,
    pub reads: usize,
}

#[derive(Default)]
struct State {
    exports: Vec<String>,
    files: HashMap<String, Vec<u8>>,
    /// Bumped when the media changes; handles from older generations are stale
    generation: u8,
    nodes: Vec<String>,
    counters: Counters,
    /// The next LOOKUP kills the transport that carries it
    drop_on_lookup: bool,
}

impl State {
    fn handle_for(&mut self, path: &str) -> [u8; FHSIZE] {
        let index = match self.nodes.iter().position(|p| p == path) {
            Some(index) => index,
            None => {
                self.nodes.push(path.to_string());
                self.nodes.len() - 1
            }
        };

        let mut handle = [0u8; FHSIZE];
        handle[0] = self.generation;
        handle[4..8].copy_from_slice(&(index as u32).to_be_bytes());
        handle
    }

    fn resolve(&self, handle: &[u8]) -> Result<String, u32> {
        if handle[0] != self.generation {
            return Err(NFSERR_STALE);
        }
        let index = u32::from_be_bytes([handle[4], handle[5], handle[6], handle[7]]) as usize;
        self.nodes.get(index).cloned().ok_or(NFSERR_STALE)
    }

    fn is_dir(&self, path: &str) -> bool {
        let prefix = format!("{}/", path);
        self.files.keys().any(|f| f.starts_with(&prefix))
    }
}

/// A fake player shared by every transport the connector hands out
#[derive(Clone, Default)]
pub struct MockPlayer {
    state: Arc<Mutex<State>>,
    transports: Arc<Mutex<Vec<Arc<MockTransport>>>>,
}

impl MockPlayer {
    pub fn new(exports: &[&str]) -> Self {
        let player = Self::default();
        player.state.lock().exports = exports.iter().map(|e| e.to_string()).collect();
        player
    }

    /// Adds a file, keyed by export and path (e.g. `/C/`, `Contents/a.mp3`)
    pub fn add_file(&self, export: &str, path: &str, contents: &[u8]) {
        let key = format!("{}{}", export.trim_end_matches('/'), normalize(path));
        self.state.lock().files.insert(key, contents.to_vec());
    }

    /// Invalidates every handle handed out so far
    pub fn change_media(&self) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        state.nodes.clear();
    }

    /// Makes the transport die while serving the next LOOKUP
    pub fn drop_connection_on_next_lookup(&self) {
        self.state.lock().drop_on_lookup = true;
    }

    fn take_drop_on_lookup(&self, call: &RpcCall) -> bool {
        let mut state = self.state.lock();
        let drop = state.drop_on_lookup && call.program == NFS_PROGRAM && call.procedure == 4;
        if drop {
            state.drop_on_lookup = false;
        }
        drop
    }

    pub fn counters(&self) -> Counters {
        self.state.lock().counters.clone()
    }

    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        self.transports.lock().clone()
    }

    fn dispatch(&self, call: &RpcCall) -> Result<Bytes, RpcError> {
        let mut args = XdrReader::new(call.args.clone());
        let mut reply = XdrWriter::new();
        let mut state = self.state.lock();

        match (call.program, call.procedure) {
            (p, 3) if p == PORTMAP_PROGRAM => {
                let program = args.get_u32()?;
                let port = match program {
                    id if id == MOUNT_PROGRAM.id => MOUNT_PORT,
                    id if id == NFS_PROGRAM.id => NFS_PORT,
                    _ => 0,
                };
                reply.put_u32(port);
            }
            (p, 5) if p == MOUNT_PROGRAM => {
                state.counters.exports += 1;
                for export in &state.exports {
                    reply.put_bool(true).put_string(export).put_bool(false);
                }
                reply.put_bool(false);
            }
            (p, 1) if p == MOUNT_PROGRAM => {
                state.counters.mounts += 1;
                let export = args.get_string()?;
                if state.exports.contains(&export) {
                    let root = export.trim_end_matches('/').to_string();
                    let handle = state.handle_for(&root);
                    reply.put_u32(NFS_OK).put_opaque_fixed(&handle);
                } else {
                    reply.put_u32(NFSERR_NOENT);
                }
            }
            (p, 4) if p == NFS_PROGRAM => {
                state.counters.lookups += 1;
                let dir = args.get_opaque_fixed(FHSIZE)?;
                let raw = args.get_opaque()?;
                let units: Vec<u16> = raw
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                let name = String::from_utf16_lossy(&units);

                match state.resolve(&dir) {
                    Err(status) => {
                        reply.put_u32(status);
                    }
                    Ok(dir_path) => {
                        let path = format!("{}/{}", dir_path, name);
                        let size = state.files.get(&path).map(|f| f.len() as u32);
                        let is_dir = state.is_dir(&path);

                        if size.is_none() && !is_dir {
                            reply.put_u32(NFSERR_NOENT);
                        } else {
                            let handle = state.handle_for(&path);
                            reply.put_u32(NFS_OK).put_opaque_fixed(&handle);
                            put_fattr(&mut reply, if is_dir { 2 } else { 1 }, size.unwrap_or(0));
                        }
                    }
                }
            }
            (p, 6) if p == NFS_PROGRAM => {
                state.counters.reads += 1;
                let handle = args.get_opaque_fixed(FHSIZE)?;
                let offset = args.get_u32()? as usize;
                let count = args.get_u32()? as usize;

                let contents = state
                    .resolve(&handle)
                    .ok()
                    .and_then(|path| state.files.get(&path).cloned());

                match contents {
                    None => {
                        reply.put_u32(NFSERR_STALE);
                    }
                    Some(contents) => {
                        let start = offset.min(contents.len());
                        let end = (offset + count).min(contents.len());
                        reply.put_u32(NFS_OK);
                        put_fattr(&mut reply, 1, contents.len() as u32);
                        reply.put_opaque(&contents[start..end]);
                    }
                }
            }
            _ => return Err(RpcError::Rejected { accept_stat: 3 }),
        }

        Ok(reply.finish())
    }
}

fn normalize(path: &str) -> String {
    let mut normalized = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    normalized
}

fn put_fattr(w: &mut XdrWriter, file_type: u32, size: u32) {
    w.put_u32(file_type);
    for _ in 0..4 {
        w.put_u32(0);
    }
    w.put_u32(size);
    for _ in 0..11 {
        w.put_u32(0);
    }
}

/// Transport bound to a [`MockPlayer`]
pub struct MockTransport {
    address: Ipv4Addr,
    player: MockPlayer,
    connected: AtomicBool,
    retry: RwLock<RetryConfig>,
}

impl MockTransport {
    /// Simulates the socket dying
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
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
        tokio::task::yield_now().await;
        if self.player.take_drop_on_lookup(&call) {
            self.drop_connection();
            return Err(RpcError::Disconnected);
        }
        self.player.dispatch(&call)
    }
}

#[async_trait]
impl RpcConnector for MockPlayer {
    async fn connect(
        &self,
        address: Ipv4Addr,
        retry: RetryConfig,
    ) -> Result<Arc<dyn RpcTransport>, RpcError> {
        self.state.lock().counters.connects += 1;

        let transport = Arc::new(MockTransport {
            address,
            player: self.clone(),
            connected: AtomicBool::new(true),
            retry: RwLock::new(retry),
        });
        self.transports.lock().push(transport.clone());

        Ok(transport)
    }
}
