// In-process chunkserver speaking the block protocol

use super::{read_frame, write_frame};
use moosefs_client::chunk::{block_index, block_offset};
use moosefs_client::protocol::status::{ERROR_CRC, STATUS_OK};
use moosefs_client::protocol::{
    pack, Unpacker, BLOCK_SIZE, CLTOCS_READ, CLTOCS_WRITE, CLTOCS_WRITE_DATA, CLTOCS_WRITE_FINISH,
    CSTOCL_READ_DATA, CSTOCL_READ_STATUS, CSTOCL_WRITE_STATUS,
};
use moosefs_client::{Replica, Version};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the mock misbehaves.
#[derive(Debug, Clone, Copy)]
pub struct ChunkserverBehavior {
    /// Flip a bit in every CRC sent with read data.
    pub corrupt_crc: bool,
    /// Status sent instead of data for reads.
    pub read_status: u8,
}

impl Default for ChunkserverBehavior {
    fn default() -> Self {
        Self {
            corrupt_crc: false,
            read_status: STATUS_OK,
        }
    }
}

/// Everything the mock stored or observed.
#[derive(Debug, Default)]
pub struct ChunkserverState {
    /// Block contents keyed by chunk id and block index.
    pub blocks: HashMap<(u64, u16), Vec<u8>>,
    /// Write ids in the order they arrived.
    pub write_ids: Vec<u32>,
    /// Replica chains announced by write requests.
    pub write_chains: Vec<Vec<(Ipv4Addr, u16)>>,
    pub reads: usize,
    pub connections: usize,
}

impl ChunkserverState {
    /// Contents of `chunk_id` in `[offset, offset + len)`.
    pub fn chunk_bytes(&self, chunk_id: u64, offset: u32, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        for pos in offset..offset + len as u32 {
            let byte = self
                .blocks
                .get(&(chunk_id, block_index(pos)))
                .map_or(0, |b| b[block_offset(pos) as usize]);
            out.push(byte);
        }
        out
    }
}

pub struct MockChunkserver {
    addr: SocketAddr,
    state: Arc<Mutex<ChunkserverState>>,
    behavior: Arc<Mutex<ChunkserverBehavior>>,
    task: JoinHandle<()>,
}

impl MockChunkserver {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(ChunkserverState::default()));
        let behavior = Arc::new(Mutex::new(ChunkserverBehavior::default()));

        let task = {
            let state = Arc::clone(&state);
            let behavior = Arc::clone(&behavior);
            tokio::spawn(async move {
                while let Ok((sock, _)) = listener.accept().await {
                    state.lock().connections += 1;
                    let state = Arc::clone(&state);
                    let behavior = Arc::clone(&behavior);
                    tokio::spawn(async move {
                        let _ = serve(sock, state, behavior).await;
                    });
                }
            })
        };

        Self {
            addr,
            state,
            behavior,
            task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Replica descriptor pointing at this mock.
    pub fn replica(&self) -> Replica {
        Replica {
            ip: Ipv4Addr::LOCALHOST,
            port: self.addr.port(),
            version: Version::new(4, 0, 0),
            label_mask: None,
        }
    }

    pub fn set_behavior(&self, behavior: ChunkserverBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn state(&self) -> MutexGuard<'_, ChunkserverState> {
        self.state.lock()
    }
}

impl Drop for MockChunkserver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut sock: TcpStream,
    state: Arc<Mutex<ChunkserverState>>,
    behavior: Arc<Mutex<ChunkserverBehavior>>,
) -> std::io::Result<()> {
    while let Some((cmd, payload)) = read_frame(&mut sock).await? {
        let mut u = Unpacker::new("mock_chunkserver", &payload);
        match cmd {
            CLTOCS_READ => {
                let _protocol_id = u.u8().unwrap();
                let chunk_id = u.u64().unwrap();
                let _version = u.u32().unwrap();
                let offset = u.u32().unwrap();
                let size = u.u32().unwrap();
                let behavior = *behavior.lock();

                if behavior.read_status != STATUS_OK {
                    let status = pack(&[&chunk_id, &behavior.read_status]);
                    write_frame(&mut sock, CSTOCL_READ_STATUS, &status).await?;
                    continue;
                }

                let frames = {
                    let mut st = state.lock();
                    st.reads += 1;
                    read_frames(&st, chunk_id, offset, size, behavior.corrupt_crc)
                };
                for data in frames {
                    write_frame(&mut sock, CSTOCL_READ_DATA, &data).await?;
                }
                let status = pack(&[&chunk_id, &STATUS_OK]);
                write_frame(&mut sock, CSTOCL_READ_STATUS, &status).await?;
            }
            CLTOCS_WRITE => {
                let _protocol_id = u.u8().unwrap();
                let chunk_id = u.u64().unwrap();
                let _version = u.u32().unwrap();
                let mut chain = Vec::new();
                while u.remaining() >= 6 {
                    chain.push((Ipv4Addr::from(u.u32().unwrap()), u.u16().unwrap()));
                }
                state.lock().write_chains.push(chain);

                let ack = pack(&[&chunk_id, &0u32, &STATUS_OK]);
                write_frame(&mut sock, CSTOCL_WRITE_STATUS, &ack).await?;
            }
            CLTOCS_WRITE_DATA => {
                let chunk_id = u.u64().unwrap();
                let write_id = u.u32().unwrap();
                let block = u.u16().unwrap();
                let offset = u.u16().unwrap() as usize;
                let size = u.u32().unwrap() as usize;
                let crc = u.u32().unwrap();
                let data = u.bytes(size).unwrap();

                let status = if crc32fast::hash(data) == crc {
                    let mut st = state.lock();
                    st.write_ids.push(write_id);
                    let stored = st
                        .blocks
                        .entry((chunk_id, block))
                        .or_insert_with(|| vec![0u8; BLOCK_SIZE as usize]);
                    stored[offset..offset + size].copy_from_slice(data);
                    STATUS_OK
                } else {
                    ERROR_CRC
                };

                let ack = pack(&[&chunk_id, &write_id, &status]);
                write_frame(&mut sock, CSTOCL_WRITE_STATUS, &ack).await?;
            }
            CLTOCS_WRITE_FINISH => {}
            _ => return Ok(()),
        }
    }
    Ok(())
}

fn read_frames(
    state: &ChunkserverState,
    chunk_id: u64,
    offset: u32,
    size: u32,
    corrupt_crc: bool,
) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut pos = offset;
    let end = offset + size;
    while pos < end {
        let within = block_offset(pos) as u32;
        let span = (BLOCK_SIZE - within).min(end - pos);
        let data = state.chunk_bytes(chunk_id, pos, span as usize);
        let mut crc = crc32fast::hash(&data);
        if corrupt_crc {
            crc ^= 1;
        }
        let mut frame = pack(&[
            &chunk_id,
            &block_index(pos),
            &block_offset(pos),
            &span,
            &crc,
        ]);
        frame.extend(data);
        frames.push(frame);
        pos += span;
    }
    frames
}
