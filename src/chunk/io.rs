//! Block transfers with chunkservers.
//!
//! Reads stream one `READ_DATA` frame per block followed by a final status
//! frame. Writes push one `WRITE_DATA` frame per block and wait for its
//! acknowledgement before sending the next. Every block carries a CRC32 of
//! its payload, which is checked on read.
//!
//! A connection is handed back to the pool only after a transfer completed
//! cleanly; after any failure its stream position is unknown, so it is
//! closed instead.

use super::{block_index, block_offset, ChunkLocation, Replica};
use crate::error::{MfsError, Result};
use crate::observability;
use crate::pool::ChunkserverPool;
use crate::protocol::status::STATUS_OK;
use crate::protocol::{
    frame, pack, pack_command, Unpacker, BLOCK_SIZE, CHUNK_SIZE, CLTOCS_READ, CLTOCS_WRITE,
    CLTOCS_WRITE_DATA, CLTOCS_WRITE_FINISH, CSTOCL_READ_DATA, CSTOCL_READ_STATUS,
    CSTOCL_WRITE_STATUS,
};
use crate::transport::{Transport, TransportGuard};
use tracing::{debug, warn};

const READ_STATUS_LEN: u32 = 9;
const READ_DATA_HEADER_LEN: u32 = 20;
const WRITE_STATUS_LEN: u32 = 13;

/// Reads and writes chunk data over pooled chunkserver connections.
#[derive(Clone)]
pub struct ChunkIo {
    pool: ChunkserverPool,
}

impl ChunkIo {
    pub fn new(pool: ChunkserverPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ChunkserverPool {
        &self.pool
    }

    /// Fill `buf` from the chunk starting at chunk-relative `offset`.
    ///
    /// Replicas are tried in order; the error from the last one is returned
    /// if none succeeds.
    pub async fn read(&self, loc: &ChunkLocation, offset: u32, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        check_range(offset, buf.len())?;
        if loc.is_empty() {
            buf.fill(0);
            return Ok(buf.len());
        }

        let mut last_error = None;
        for replica in &loc.replicas {
            match self.read_replica(replica, loc, offset, buf).await {
                Ok(()) => {
                    observability::record_chunk_read(buf.len() as u64);
                    return Ok(buf.len());
                }
                Err(e) => {
                    warn!(
                        chunk_id = loc.chunk_id,
                        replica = %replica.endpoint(),
                        error = %e,
                        "Chunk read failed"
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(MfsError::NoReplicas(loc.chunk_id)))
    }

    async fn read_replica(
        &self,
        replica: &Replica,
        loc: &ChunkLocation,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        let conn = self.pool.get(&replica.endpoint()).await?;
        let result = {
            let mut guard = conn.lock().await;
            read_blocks(&mut guard, loc, offset, buf).await
        };
        self.release(conn, result.is_ok()).await;
        result
    }

    /// Write `data` into the chunk at chunk-relative `offset`.
    ///
    /// The data goes to the first replica; the chunkserver forwards it along
    /// the chain named in the write request.
    pub async fn write(&self, loc: &ChunkLocation, offset: u32, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        check_range(offset, data.len())?;
        let replica = loc
            .replicas
            .first()
            .ok_or(MfsError::NoReplicas(loc.chunk_id))?;

        let conn = self.pool.get(&replica.endpoint()).await?;
        let result = {
            let mut guard = conn.lock().await;
            write_blocks(&mut guard, loc, offset, data).await
        };
        self.release(conn, result.is_ok()).await;

        match result {
            Ok(()) => {
                observability::record_chunk_write(data.len() as u64);
                Ok(data.len())
            }
            Err(e) => {
                warn!(
                    chunk_id = loc.chunk_id,
                    replica = %replica.endpoint(),
                    error = %e,
                    "Chunk write failed"
                );
                Err(e)
            }
        }
    }

    async fn release(&self, conn: Transport, clean: bool) {
        if clean {
            self.pool.put(conn).await;
        } else {
            self.pool.discard(conn).await;
        }
    }
}

fn check_range(offset: u32, len: usize) -> Result<()> {
    if u64::from(offset) + len as u64 > u64::from(CHUNK_SIZE) {
        return Err(MfsError::InvalidArgument(format!(
            "range {}+{} crosses the chunk boundary",
            offset, len
        )));
    }
    Ok(())
}

/// Bytes of the block at `offset` covered by a transfer with `remaining`
/// bytes left.
fn block_span(offset: u32, remaining: usize) -> usize {
    let room = (BLOCK_SIZE - u32::from(block_offset(offset))) as usize;
    room.min(remaining)
}

async fn read_blocks(
    guard: &mut TransportGuard<'_>,
    loc: &ChunkLocation,
    offset: u32,
    buf: &mut [u8],
) -> Result<()> {
    let request = pack_command(
        CLTOCS_READ,
        &[
            &loc.protocol_id,
            &loc.chunk_id,
            &loc.version,
            &offset,
            &(buf.len() as u32),
        ],
    );
    guard.send(&request).await?;

    let mut done = 0usize;
    loop {
        let header = guard.recv_header().await?;
        if header.is_nop() {
            guard.recv_payload(header.size).await?;
            continue;
        }

        match header.cmd {
            CSTOCL_READ_STATUS => {
                if header.size != READ_STATUS_LEN {
                    return Err(MfsError::protocol(
                        "chunk_read",
                        format!("status frame of {} bytes", header.size),
                    ));
                }
                let payload = guard.recv_payload(header.size).await?;
                let mut u = Unpacker::new("chunk_read", &payload);
                let chunk_id = u.u64()?;
                let status = u.u8()?;
                expect_chunk("chunk_read", loc.chunk_id, chunk_id)?;
                if status != STATUS_OK {
                    return Err(MfsError::status("chunk_read", status));
                }
                if done < buf.len() {
                    return Err(MfsError::protocol(
                        "chunk_read",
                        format!("status after {} of {} bytes", done, buf.len()),
                    ));
                }
                debug!(chunk_id, bytes = done, "Chunk read complete");
                return Ok(());
            }
            CSTOCL_READ_DATA => {
                if header.size < READ_DATA_HEADER_LEN {
                    return Err(MfsError::protocol(
                        "chunk_read",
                        format!("data frame of {} bytes", header.size),
                    ));
                }
                let head = guard.recv_payload(READ_DATA_HEADER_LEN).await?;
                let mut u = Unpacker::new("chunk_read", &head);
                let chunk_id = u.u64()?;
                let block = u.u16()?;
                let block_off = u.u16()?;
                let size = u.u32()?;
                let crc = u.u32()?;
                expect_chunk("chunk_read", loc.chunk_id, chunk_id)?;

                if header.size != READ_DATA_HEADER_LEN + size {
                    return Err(MfsError::protocol(
                        "chunk_read",
                        format!("block size {} in a frame of {} bytes", size, header.size),
                    ));
                }
                if done == buf.len() {
                    return Err(MfsError::protocol("chunk_read", "data past the requested range"));
                }
                let position = offset + done as u32;
                let expected = block_span(position, buf.len() - done);
                if size as usize != expected {
                    return Err(MfsError::protocol(
                        "chunk_read",
                        format!("block of {} bytes, expected {}", size, expected),
                    ));
                }
                if block != block_index(position) || block_off != block_offset(position) {
                    return Err(MfsError::protocol(
                        "chunk_read",
                        format!(
                            "block {}+{} where {}+{} was expected",
                            block,
                            block_off,
                            block_index(position),
                            block_offset(position)
                        ),
                    ));
                }

                let target = &mut buf[done..done + expected];
                guard.recv(target).await?;
                let actual = crc32fast::hash(target);
                if actual != crc {
                    observability::record_crc_error();
                    return Err(MfsError::ChecksumMismatch {
                        chunk_id,
                        expected: crc,
                        actual,
                    });
                }
                done += expected;
            }
            other => {
                return Err(MfsError::protocol(
                    "chunk_read",
                    format!("unexpected command {}", other),
                ));
            }
        }
    }
}

async fn write_blocks(
    guard: &mut TransportGuard<'_>,
    loc: &ChunkLocation,
    offset: u32,
    data: &[u8],
) -> Result<()> {
    let mut open = pack(&[&loc.protocol_id, &loc.chunk_id, &loc.version]);
    for replica in &loc.replicas {
        open.extend(pack(&[&u32::from(replica.ip), &replica.port]));
    }
    guard.send(&frame(CLTOCS_WRITE, &open)).await?;

    let mut write_id = 1u32;
    let mut sent = 0usize;
    while sent < data.len() {
        let position = offset + sent as u32;
        let span = block_span(position, data.len() - sent);
        let block = &data[sent..sent + span];
        let request = pack_command(
            CLTOCS_WRITE_DATA,
            &[
                &loc.chunk_id,
                &write_id,
                &block_index(position),
                &block_offset(position),
                &(span as u32),
                &crc32fast::hash(block),
                &block,
            ],
        );
        guard.send(&request).await?;
        wait_write_status(guard, loc.chunk_id, write_id).await?;

        sent += span;
        write_id += 1;
    }

    let finish = pack_command(CLTOCS_WRITE_FINISH, &[&loc.chunk_id, &loc.version]);
    guard.send(&finish).await?;
    debug!(chunk_id = loc.chunk_id, bytes = sent, "Chunk write complete");
    Ok(())
}

/// Wait for the acknowledgement of `write_id`. The chunkserver acknowledges
/// the write request itself with id 0, which is skipped.
async fn wait_write_status(
    guard: &mut TransportGuard<'_>,
    chunk_id: u64,
    write_id: u32,
) -> Result<()> {
    loop {
        let header = guard.recv_header().await?;
        if header.is_nop() {
            guard.recv_payload(header.size).await?;
            continue;
        }
        if header.cmd != CSTOCL_WRITE_STATUS || header.size != WRITE_STATUS_LEN {
            return Err(MfsError::protocol(
                "chunk_write",
                format!("unexpected frame {} of {} bytes", header.cmd, header.size),
            ));
        }

        let payload = guard.recv_payload(header.size).await?;
        let mut u = Unpacker::new("chunk_write", &payload);
        let acked_chunk = u.u64()?;
        let acked_id = u.u32()?;
        let status = u.u8()?;

        expect_chunk("chunk_write", chunk_id, acked_chunk)?;
        if status != STATUS_OK {
            return Err(MfsError::status("chunk_write", status));
        }
        if acked_id == 0 {
            continue;
        }
        if acked_id != write_id {
            return Err(MfsError::protocol(
                "chunk_write",
                format!("acknowledged write {} while waiting for {}", acked_id, write_id),
            ));
        }
        return Ok(());
    }
}

fn expect_chunk(op: &'static str, expected: u64, got: u64) -> Result<()> {
    if expected != got {
        return Err(MfsError::protocol(
            op,
            format!("reply for chunk {:#x}, expected {:#x}", got, expected),
        ));
    }
    Ok(())
}
