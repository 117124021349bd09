//! Chunk locations and addressing.
//!
//! File data is split into chunks of [`CHUNK_SIZE`] bytes, each made of
//! 1024 blocks of [`BLOCK_SIZE`] bytes. The master answers a chunk query with
//! the chunk id, its version and the chunkservers holding a replica; the
//! data itself moves between this client and the chunkservers (see
//! [`ChunkIo`]).

mod io;

pub use io::ChunkIo;

use crate::error::{MfsError, Result};
use crate::protocol::{
    Unpacker, BLOCK_BITS, BLOCK_MASK, CHUNK_BITS, CHUNK_MASK, CHUNK_SIZE,
};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// A chunkserver holding a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub ip: Ipv4Addr,
    pub port: u16,
    /// Decoded with [`Version::from_wire`] like the master's version, so the
    /// patch shift of 2.x+ servers is undone.
    pub version: Version,
    /// Storage class labels; only sent by newer masters.
    pub label_mask: Option<u32>,
}

impl Replica {
    /// `ip:port` for dialing.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Where a chunk lives and how to address it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLocation {
    pub protocol_id: u8,
    /// File length as known to the master.
    pub length: u64,
    /// Zero for a chunk that was never written.
    pub chunk_id: u64,
    pub version: u32,
    /// In the master's preference order.
    pub replicas: Vec<Replica>,
}

impl ChunkLocation {
    /// Query id, protocol id, length, chunk id and version.
    pub const MIN_REPLY_LEN: usize = 25;

    /// Decode a read/write chunk reply.
    pub fn decode(op: &'static str, buf: &[u8]) -> Result<Self> {
        let mut u = Unpacker::new(op, buf);
        u.skip(4)?;
        let protocol_id = u.u8()?;
        let length = u.u64()?;
        let chunk_id = u.u64()?;
        let version = u.u32()?;

        let with_labels = protocol_id == 2;
        let width = if with_labels { 14 } else { 10 };
        if u.remaining() % width != 0 {
            return Err(MfsError::protocol(
                op,
                format!(
                    "{} bytes of replica data is not a multiple of {}",
                    u.remaining(),
                    width
                ),
            ));
        }

        let mut replicas = Vec::with_capacity(u.remaining() / width);
        while !u.is_empty() {
            replicas.push(Replica {
                ip: Ipv4Addr::from(u.u32()?),
                port: u.u16()?,
                version: Version::from_wire(u.u32()?),
                label_mask: if with_labels { Some(u.u32()?) } else { None },
            });
        }

        Ok(Self {
            protocol_id,
            length,
            chunk_id,
            version,
            replicas,
        })
    }

    /// Whether no data was ever stored for this chunk.
    pub fn is_empty(&self) -> bool {
        self.chunk_id == 0
    }
}

/// Index of the chunk holding file offset `offset`.
pub fn chunk_index(offset: u64) -> u32 {
    (offset >> CHUNK_BITS) as u32
}

/// Position of file offset `offset` inside its chunk.
pub fn chunk_offset(offset: u64) -> u32 {
    (offset & CHUNK_MASK) as u32
}

/// Block number of a chunk-relative offset.
pub fn block_index(offset: u32) -> u16 {
    ((offset & (CHUNK_SIZE - 1)) >> BLOCK_BITS) as u16
}

/// Position of a chunk-relative offset inside its block.
pub fn block_offset(offset: u32) -> u16 {
    (offset & BLOCK_MASK) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{pack, BLOCK_SIZE};

    fn reply(protocol_id: u8, replicas: &[(Ipv4Addr, u16)]) -> Vec<u8> {
        let mut buf = pack(&[&0u32, &protocol_id, &(9u64 << 20), &0x51u64, &3u32]);
        for (ip, port) in replicas {
            buf.extend(pack(&[&u32::from(*ip), port, &Version::new(4, 0, 10)]));
            if protocol_id == 2 {
                buf.extend(pack(&[&0xFFu32]));
            }
        }
        buf
    }

    #[test]
    fn test_decode_location_without_labels() {
        let buf = reply(1, &[(Ipv4Addr::new(10, 0, 0, 2), 9422), (Ipv4Addr::new(10, 0, 0, 3), 9422)]);
        let loc = ChunkLocation::decode("read_chunk", &buf).unwrap();

        assert_eq!(loc.chunk_id, 0x51);
        assert_eq!(loc.version, 3);
        assert_eq!(loc.length, 9 << 20);
        assert_eq!(loc.replicas.len(), 2);
        assert_eq!(loc.replicas[1].endpoint(), "10.0.0.3:9422");
        assert_eq!(loc.replicas[0].version, Version::new(4, 0, 5));
        assert_eq!(loc.replicas[0].label_mask, None);
    }

    #[test]
    fn test_decode_location_with_labels() {
        let buf = reply(2, &[(Ipv4Addr::new(192, 168, 1, 9), 9522)]);
        assert_eq!(buf.len(), 25 + 14);

        let loc = ChunkLocation::decode("write_chunk", &buf).unwrap();
        assert_eq!(loc.replicas.len(), 1);
        assert_eq!(loc.replicas[0].label_mask, Some(0xFF));
    }

    #[test]
    fn test_decode_location_rejects_ragged_replicas() {
        let mut buf = reply(1, &[(Ipv4Addr::LOCALHOST, 9422)]);
        buf.push(0);
        let err = ChunkLocation::decode("read_chunk", &buf).unwrap_err();
        assert!(matches!(err, MfsError::Protocol { .. }));
    }

    #[test]
    fn test_decode_empty_chunk() {
        let buf = pack(&[&0u32, &1u8, &0u64, &0u64, &0u32]);
        let loc = ChunkLocation::decode("read_chunk", &buf).unwrap();
        assert!(loc.is_empty());
        assert!(loc.replicas.is_empty());
    }

    #[test]
    fn test_addressing() {
        let offset = 3 * u64::from(CHUNK_SIZE) + 5 * u64::from(BLOCK_SIZE) + 17;
        assert_eq!(chunk_index(offset), 3);
        assert_eq!(chunk_offset(offset), 5 * BLOCK_SIZE + 17);
        assert_eq!(block_index(chunk_offset(offset)), 5);
        assert_eq!(block_offset(chunk_offset(offset)), 17);

        assert_eq!(chunk_index(u64::from(CHUNK_SIZE) - 1), 0);
        assert_eq!(block_index(CHUNK_SIZE - 1), 1023);
        assert_eq!(block_offset(BLOCK_SIZE - 1), 0xFFFF);

        // One byte past the first chunk boundary.
        assert_eq!(chunk_index(0x0400_0001), 1);
        assert_eq!(chunk_offset(0x0400_0001), 1);
        assert_eq!(block_index(chunk_offset(0x0400_0001)), 0);
        assert_eq!(block_offset(chunk_offset(0x0400_0001)), 1);
    }
}
