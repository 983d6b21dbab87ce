//! Mount (v1) and NFS (v2) procedures used to pull files off a player.

use crate::error::{NfsError, Result};
use crate::rpc::RpcProgram;
use crate::xdr::{XdrReader, XdrWriter};
use bytes::{Bytes, BytesMut};
use std::fmt;
use tracing::{debug, trace};

const MOUNTPROC_MNT: u32 = 1;
const MOUNTPROC_EXPORT: u32 = 5;
const NFSPROC_LOOKUP: u32 = 4;
const NFSPROC_READ: u32 = 6;

/// NFSv2 file handle size
pub const FHSIZE: usize = 32;

/// Number of 32 bit words in an NFSv2 `fattr`
const FATTR_WORDS: usize = 17;

pub const NFS_OK: u32 = 0;
pub const NFSERR_NOENT: u32 = 2;
pub const NFSERR_STALE: u32 = 70;

/// Opaque NFSv2 file handle
#[derive(Clone, PartialEq, Eq)]
pub struct FileHandle(pub [u8; FHSIZE]);

impl FileHandle {
    fn decode(r: &mut XdrReader) -> std::result::Result<Self, crate::error::XdrError> {
        let raw = r.get_opaque_fixed(FHSIZE)?;
        let mut handle = [0u8; FHSIZE];
        handle.copy_from_slice(&raw);
        Ok(Self(handle))
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileHandle(")?;
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..)")
    }
}

/// A filesystem advertised by the mount daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub filesystem: String,
    pub groups: Vec<String>,
}

/// A resolved file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub handle: FileHandle,
    pub name: String,
    pub size: u32,
    pub file_type: u32,
}

/// Bytes read so far out of the file size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    pub read: u64,
    pub total: u64,
}

/// Progress callback invoked after every chunk
pub type ProgressFn = Box<dyn FnMut(FetchProgress) + Send>;

/// Lists the exports of the device.
pub async fn list_exports(mount: &RpcProgram) -> Result<Vec<Export>> {
    let reply = mount.call(MOUNTPROC_EXPORT, Bytes::new()).await?;
    let mut r = XdrReader::new(reply);

    let mut exports = Vec::new();
    while r.get_bool()? {
        let filesystem = r.get_string()?;

        let mut groups = Vec::new();
        while r.get_bool()? {
            groups.push(r.get_string()?);
        }

        exports.push(Export { filesystem, groups });
    }

    debug!(
        address = %mount.transport().address(),
        count = exports.len(),
        "Listed exports"
    );

    Ok(exports)
}

/// Mounts an export, returning its root handle.
pub async fn mount_filesystem(mount: &RpcProgram, export: &Export) -> Result<FileHandle> {
    let mut args = XdrWriter::new();
    args.put_string(&export.filesystem);

    let reply = mount.call(MOUNTPROC_MNT, args.finish()).await?;
    let mut r = XdrReader::new(reply);

    let status = r.get_u32()?;
    if status != NFS_OK {
        return Err(NfsError::MountFailed {
            export: export.filesystem.clone(),
            status,
        });
    }

    Ok(FileHandle::decode(&mut r)?)
}

/// Player NFS servers expect file names as UTF-16LE
fn encode_filename(name: &str) -> Vec<u8> {
    name.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

async fn lookup(nfs: &RpcProgram, dir: &FileHandle, name: &str, path: &str) -> Result<FileInfo> {
    let mut args = XdrWriter::new();
    args.put_opaque_fixed(&dir.0).put_opaque(&encode_filename(name));

    let reply = nfs.call(NFSPROC_LOOKUP, args.finish()).await?;
    let mut r = XdrReader::new(reply);

    match r.get_u32()? {
        NFS_OK => {}
        NFSERR_STALE => {
            return Err(NfsError::StaleHandle {
                path: path.to_string(),
            })
        }
        status => {
            return Err(NfsError::PathNotFound {
                path: path.to_string(),
                status,
            })
        }
    }

    let handle = FileHandle::decode(&mut r)?;
    let file_type = r.get_u32()?;
    r.skip(4 * 4)?; // mode, nlink, uid, gid
    let size = r.get_u32()?;
    r.skip(4 * (FATTR_WORDS - 6))?;

    Ok(FileInfo {
        handle,
        name: name.to_string(),
        size,
        file_type,
    })
}

/// Resolves `path` segment by segment below `root`.
pub async fn lookup_path(nfs: &RpcProgram, root: &FileHandle, path: &str) -> Result<FileInfo> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if segments.is_empty() {
        return Err(NfsError::PathNotFound {
            path: path.to_string(),
            status: NFSERR_NOENT,
        });
    }

    let mut handle = root.clone();
    let mut info = None;

    for segment in segments {
        let found = lookup(nfs, &handle, segment, path).await?;
        trace!(segment = segment, handle = ?found.handle, "Resolved path segment");
        handle = found.handle.clone();
        info = Some(found);
    }

    info.ok_or_else(|| NfsError::PathNotFound {
        path: path.to_string(),
        status: NFSERR_NOENT,
    })
}

/// Reads the whole file in `chunk_size` pieces.
pub async fn fetch_file_contents(
    nfs: &RpcProgram,
    file: &FileInfo,
    chunk_size: u32,
    mut on_progress: Option<&mut ProgressFn>,
) -> Result<Bytes> {
    let total = file.size as u64;
    let mut contents = BytesMut::with_capacity(file.size as usize);

    while (contents.len() as u64) < total {
        let offset = contents.len() as u32;

        let mut args = XdrWriter::new();
        args.put_opaque_fixed(&file.handle.0)
            .put_u32(offset)
            .put_u32(chunk_size)
            .put_u32(0); // totalcount, unused by v2 servers

        let reply = nfs.call(NFSPROC_READ, args.finish()).await?;
        let mut r = XdrReader::new(reply);

        let status = r.get_u32()?;
        if status != NFS_OK {
            return Err(NfsError::ReadFailed { status });
        }

        r.skip(4 * FATTR_WORDS)?;
        let data = r.get_opaque()?;

        if data.is_empty() {
            return Err(NfsError::ShortRead {
                read: contents.len() as u64,
                total,
            });
        }

        contents.extend_from_slice(&data);

        if let Some(callback) = on_progress.as_deref_mut() {
            callback(FetchProgress {
                read: contents.len() as u64,
                total,
            });
        }
    }

    debug!(
        address = %nfs.transport().address(),
        file = %file.name,
        bytes = contents.len(),
        "Fetched file"
    );

    Ok(contents.freeze())
}
