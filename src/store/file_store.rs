//! Single-file snapshot store
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("SMTANCHR")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes
//!   - payload_len: 8 bytes (u64 LE)
//!   - checksum: 32 bytes (BLAKE3 of the payload)
//!   - reserved: 8 bytes
//!
//! [PAYLOAD: payload_len bytes]
//!   - zstd-compressed bincode of the whole state
//! ```
//!
//! Every commit rewrites the file through a temp file and a rename, so a
//! crash leaves either the old or the new snapshot on disk.

use super::State;
use crate::{Error, Result, MAGIC, VERSION};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const HEADER_SIZE: usize = 64;
const COMPRESSION_LEVEL: i32 = 3;

/// Snapshot file holding the complete persisted state
#[derive(Clone, Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and verify the snapshot
    pub fn load(&self) -> Result<State> {
        let mut file = File::open(&self.path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        if bytes.len() < HEADER_SIZE {
            return Err(Error::InvalidFile("File shorter than header".into()));
        }
        let (header, payload) = bytes.split_at(HEADER_SIZE);

        if &header[0..8] != MAGIC {
            return Err(Error::InvalidFile("Invalid magic bytes".into()));
        }

        let version = u32::from_le_bytes(field(header, 8)?);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }

        let payload_len = u64::from_le_bytes(field(header, 16)?);
        if payload_len != payload.len() as u64 {
            return Err(Error::Corruption(format!(
                "payload is {} bytes, header says {}",
                payload.len(),
                payload_len
            )));
        }

        let checksum: [u8; 32] = field(header, 24)?;
        if blake3::hash(payload).as_bytes() != &checksum {
            return Err(Error::Corruption("payload checksum mismatch".into()));
        }

        let data = zstd::decode_all(payload)?;
        let state: State = bincode::deserialize(&data)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "loaded snapshot");
        Ok(state)
    }

    /// Atomically replace the snapshot
    pub fn save(&self, state: &State) -> Result<()> {
        let data = bincode::serialize(state)?;
        let payload = zstd::encode_all(&data[..], COMPRESSION_LEVEL)?;

        let mut header = [0u8; HEADER_SIZE];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        // flags: 0
        header[16..24].copy_from_slice(&(payload.len() as u64).to_le_bytes());
        header[24..56].copy_from_slice(blake3::hash(&payload).as_bytes());

        let tmp = self.temp_path();
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&header)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), bytes = HEADER_SIZE + payload.len(), "wrote snapshot");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Fixed-size header field starting at `offset`
fn field<const N: usize>(header: &[u8], offset: usize) -> Result<[u8; N]> {
    header
        .get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| Error::InvalidFile(format!("truncated header field at {}", offset)))
}
